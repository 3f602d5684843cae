//! Request bodies of the gateway commands.
//!
//! Each command has its own struct with the exact field names the gateway
//! expects, including its spelling of `RecieverIdentifierType` and
//! `Occassion`. [`Payload`] tags a body with the command it belongs to and
//! knows the endpoint it is posted to.
//!
//! Shortcodes and phone numbers are carried as digit strings. Struct fields
//! are named after their wire keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::credential::SecurityCredential;
use crate::error::ValidationError;
use crate::timestamp::{GatewayTimestamp, lnmo_password};

/// Amount sent by every B2B transfer regardless of the caller's input.
pub const B2B_FIXED_AMOUNT: u64 = 100;

/// Receiving shortcode sent by every B2B transfer regardless of the caller's input.
pub const B2B_FIXED_RECEIVER: &str = "600000";

/// Account reference sent by every B2B transfer.
pub const B2B_FIXED_REFERENCE: &str = "Bennito";

/// Transaction id sent by every reversal regardless of the caller's input.
pub const REVERSAL_FIXED_TRANSACTION_ID: &str = "LIE81C8EFI";

/// Sample transaction id from the gateway documentation.
pub const SAMPLE_TRANSACTION_ID: &str = "LH7819VXPE";

/// Default STK push account reference and description.
pub const DEFAULT_STK_REFERENCE: &str = "Payment";

/// Rejects amounts below the gateway minimum of 1.
///
/// # Errors
///
/// Returns [`ValidationError::Amount`] when `amount` is zero.
pub fn validate_amount(amount: u64) -> Result<u64, ValidationError> {
    if amount < 1 {
        Err(ValidationError::Amount(amount))
    } else {
        Ok(amount)
    }
}

/// Rejects phone numbers that are empty or contain anything but digits.
///
/// # Errors
///
/// Returns [`ValidationError::Phone`] for non-numeric input.
pub fn validate_phone(phone: &str) -> Result<&str, ValidationError> {
    if !phone.is_empty() && phone.bytes().all(|b| b.is_ascii_digit()) {
        Ok(phone)
    } else {
        Err(ValidationError::Phone(phone.to_owned()))
    }
}

/// Kind of B2C disbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum B2cCommandId {
    /// Salary payment to a registered customer.
    SalaryPayment,
    /// Normal business payment.
    BusinessPayment,
    /// Promotional payment.
    PromotionPayment,
}

impl B2cCommandId {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SalaryPayment => "SalaryPayment",
            Self::BusinessPayment => "BusinessPayment",
            Self::PromotionPayment => "PromotionPayment",
        }
    }
}

impl fmt::Display for B2cCommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for B2cCommandId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SalaryPayment" => Ok(Self::SalaryPayment),
            "BusinessPayment" => Ok(Self::BusinessPayment),
            "PromotionPayment" => Ok(Self::PromotionPayment),
            other => Err(format!(
                "unknown B2C command '{other}' (expected SalaryPayment, BusinessPayment or PromotionPayment)"
            )),
        }
    }
}

/// How the gateway treats C2B payments when the validation URL is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    /// Complete the payment.
    Completed,
    /// Cancel the payment.
    Cancelled,
}

/// `POST /mpesa/b2c/v1/paymentrequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct B2cRequest {
    /// Portal username of the initiator.
    #[serde(rename = "InitiatorName")]
    pub initiator_name: String,
    /// Encrypted initiator password.
    #[serde(rename = "SecurityCredential")]
    pub security_credential: SecurityCredential,
    /// Kind of disbursement.
    #[serde(rename = "CommandID")]
    pub command_id: B2cCommandId,
    /// Amount in whole shillings.
    #[serde(rename = "Amount")]
    pub amount: u64,
    /// Paying shortcode.
    #[serde(rename = "PartyA")]
    pub party_a: String,
    /// Receiving phone number.
    #[serde(rename = "PartyB")]
    pub party_b: String,
    /// Free-text comment.
    #[serde(rename = "Remarks")]
    pub remarks: String,
    /// Called when the request times out in the gateway queue.
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: Url,
    /// Called with the final result.
    #[serde(rename = "ResultURL")]
    pub result_url: Url,
    /// Optional free-text occasion.
    #[serde(rename = "Occasion", default, skip_serializing_if = "Option::is_none")]
    pub occasion: Option<String>,
}

/// `POST /mpesa/b2b/v1/paymentrequest`
///
/// Amount, receiver and account reference are fixed; see
/// [`B2B_FIXED_AMOUNT`] and [`B2B_FIXED_RECEIVER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct B2bRequest {
    /// Portal username of the initiator.
    #[serde(rename = "Initiator")]
    pub initiator: String,
    /// Encrypted initiator password.
    #[serde(rename = "SecurityCredential")]
    pub security_credential: SecurityCredential,
    /// Always `BusinessToBusinessTransfer`.
    #[serde(rename = "CommandID")]
    pub command_id: String,
    /// Kind of identifier in `PartyA`.
    #[serde(rename = "SenderIdentifierType")]
    pub sender_identifier_type: String,
    /// Kind of identifier of the receiver.
    #[serde(rename = "RecieverIdentifierType")]
    pub receiver_identifier_type: String,
    /// Amount in whole shillings.
    #[serde(rename = "Amount")]
    pub amount: u64,
    /// Sending shortcode.
    #[serde(rename = "PartyA")]
    pub party_a: String,
    /// Receiving shortcode.
    #[serde(rename = "PartyB")]
    pub party_b: String,
    /// Reference shown to the receiver.
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    /// Free-text comment.
    #[serde(rename = "Remarks")]
    pub remarks: String,
    /// Called when the request times out in the gateway queue.
    #[serde(rename = "QueueTimeOutURL", default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_url: Option<Url>,
    /// Called with the final result.
    #[serde(rename = "ResultURL", default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<Url>,
}

/// `POST /mpesa/c2b/v1/registerurl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct C2bRegisterUrlRequest {
    /// Paybill the command applies to.
    pub short_code: String,
    /// Outcome when the validation URL cannot be reached.
    pub response_type: ResponseType,
    /// Called once a payment completes.
    #[serde(rename = "ConfirmationURL")]
    pub confirmation_url: Url,
    /// Called to accept or reject a payment.
    #[serde(rename = "ValidationURL")]
    pub validation_url: Url,
}

/// `POST /c2b/v1/simulate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct C2bSimulateRequest {
    /// Paybill the command applies to.
    pub short_code: String,
    /// Always `CustomerPayBillOnline`.
    #[serde(rename = "CommandID")]
    pub command_id: String,
    /// Amount in whole shillings.
    pub amount: u64,
    /// Paying phone number.
    pub msisdn: String,
    /// Account number the customer enters.
    pub bill_ref_number: String,
}

/// `POST /mpesa/accountbalance/v1/query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountBalanceRequest {
    /// Always `AccountBalance`.
    #[serde(rename = "CommandID")]
    pub command_id: String,
    /// Shortcode whose balance is queried.
    pub party_a: String,
    /// Kind of identifier in `PartyA`.
    pub identifier_type: String,
    /// Free-text comment.
    pub remarks: String,
    /// Portal username of the initiator.
    pub initiator: String,
    /// Encrypted initiator password.
    pub security_credential: SecurityCredential,
    /// Called when the request times out in the gateway queue.
    #[serde(rename = "QueueTimeOutURL", default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_url: Option<Url>,
    /// Called with the final result.
    #[serde(rename = "ResultURL", default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<Url>,
}

/// `POST /mpesa/transactionstatus/v1/query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactionStatusRequest {
    /// Always `TransactionStatusQuery`.
    #[serde(rename = "CommandID")]
    pub command_id: String,
    /// Shortcode that ran the transaction.
    pub party_a: String,
    /// Kind of identifier in `PartyA`.
    pub identifier_type: u8,
    /// Free-text comment.
    pub remarks: String,
    /// Portal username of the initiator.
    pub initiator: String,
    /// Encrypted initiator password.
    pub security_credential: SecurityCredential,
    /// Called when the request times out in the gateway queue.
    #[serde(rename = "QueueTimeOutURL", default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_url: Option<Url>,
    /// Called with the final result.
    #[serde(rename = "ResultURL", default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<Url>,
    /// Gateway receipt of the transaction.
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    /// Free-text occasion.
    pub occassion: String,
}

/// `POST /mpesa/reversal/v1/request`
///
/// Receiver and transaction id are fixed; see
/// [`REVERSAL_FIXED_TRANSACTION_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReversalRequest {
    /// Always `TransactionReversal`.
    #[serde(rename = "CommandID")]
    pub command_id: String,
    /// Party the reversed funds came from.
    pub receiver_party: String,
    /// Kind of identifier of the receiver.
    #[serde(rename = "RecieverIdentifierType")]
    pub receiver_identifier_type: u8,
    /// Free-text comment.
    pub remarks: String,
    /// Amount in whole shillings.
    pub amount: u64,
    /// Portal username of the initiator.
    pub initiator: String,
    /// Encrypted initiator password.
    pub security_credential: SecurityCredential,
    /// Called when the request times out in the gateway queue.
    #[serde(rename = "QueueTimeOutURL", default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_url: Option<Url>,
    /// Called with the final result.
    #[serde(rename = "ResultURL", default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<Url>,
    /// Gateway receipt of the transaction.
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
}

/// `POST /mpesa/stkpush/v1/processrequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    /// Lipa Na M-Pesa shortcode.
    pub business_short_code: String,
    /// Base64 of shortcode, passkey and timestamp.
    pub password: String,
    /// Timestamp the password was derived from.
    pub timestamp: GatewayTimestamp,
    /// Always `CustomerPayBillOnline`.
    pub transaction_type: String,
    /// Amount in whole shillings.
    pub amount: u64,
    /// Paying phone number.
    pub party_a: String,
    /// Receiving shortcode.
    pub party_b: String,
    /// Phone that receives the prompt.
    pub phone_number: String,
    /// Receives the outcome of the push.
    #[serde(rename = "CallBackURL")]
    pub callback_url: Url,
    /// Reference shown to the receiver.
    pub account_reference: String,
    /// Description shown to the payer.
    pub transaction_desc: String,
}

/// `POST /mpesa/stkpushquery/v1/query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushQueryRequest {
    /// Lipa Na M-Pesa shortcode.
    pub business_short_code: String,
    /// Base64 of shortcode, passkey and timestamp.
    pub password: String,
    /// Timestamp the password was derived from.
    pub timestamp: GatewayTimestamp,
    /// Id returned by the STK push.
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

/// Callback pair of an asynchronous command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultUrls {
    /// Called when the request times out in the gateway queue.
    pub timeout: Option<Url>,
    /// Called with the final result.
    pub result: Option<Url>,
}

/// Initiator identity carried by account-level commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiator {
    /// Portal username.
    pub name: String,
    /// Encrypted portal password.
    pub credential: SecurityCredential,
}

impl B2cRequest {
    /// Builds a disbursement from `paybill` to `phone`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a zero amount or a non-numeric phone.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        initiator: Initiator,
        command_id: B2cCommandId,
        amount: u64,
        paybill: &str,
        phone: &str,
        remarks: &str,
        occasion: Option<&str>,
        timeout: Url,
        result: Url,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            initiator_name: initiator.name,
            security_credential: initiator.credential,
            command_id,
            amount: validate_amount(amount)?,
            party_a: paybill.to_owned(),
            party_b: validate_phone(phone)?.to_owned(),
            remarks: remarks.to_owned(),
            queue_timeout_url: timeout,
            result_url: result,
            occasion: occasion.map(str::to_owned),
        })
    }
}

impl B2bRequest {
    /// Builds the fixed B2B transfer from `paybill`.
    #[must_use]
    pub fn new(initiator: Initiator, paybill: &str, urls: ResultUrls) -> Self {
        Self {
            initiator: initiator.name,
            security_credential: initiator.credential,
            command_id: "BusinessToBusinessTransfer".to_owned(),
            sender_identifier_type: "Shortcode".to_owned(),
            receiver_identifier_type: "Shortcode".to_owned(),
            amount: B2B_FIXED_AMOUNT,
            party_a: paybill.to_owned(),
            party_b: B2B_FIXED_RECEIVER.to_owned(),
            account_reference: B2B_FIXED_REFERENCE.to_owned(),
            remarks: "This is a test comment or remark".to_owned(),
            queue_timeout_url: urls.timeout,
            result_url: urls.result,
        }
    }
}

impl C2bRegisterUrlRequest {
    /// Registers the confirmation and validation URLs of `paybill`.
    #[must_use]
    pub fn new(paybill: &str, confirmation: Url, validation: Url) -> Self {
        Self {
            short_code: paybill.to_owned(),
            response_type: ResponseType::Completed,
            confirmation_url: confirmation,
            validation_url: validation,
        }
    }
}

impl C2bSimulateRequest {
    /// Simulates a customer paying `amount` into `paybill`.
    #[must_use]
    pub fn new(paybill: &str, amount: u64, msisdn: &str, reference: &str) -> Self {
        Self {
            short_code: paybill.to_owned(),
            command_id: "CustomerPayBillOnline".to_owned(),
            amount,
            msisdn: msisdn.to_owned(),
            bill_ref_number: reference.to_owned(),
        }
    }
}

impl AccountBalanceRequest {
    /// Queries the balance of `paybill`.
    #[must_use]
    pub fn new(initiator: Initiator, paybill: &str, urls: ResultUrls) -> Self {
        Self {
            command_id: "AccountBalance".to_owned(),
            party_a: paybill.to_owned(),
            identifier_type: "4".to_owned(),
            remarks: "Remarks or short description".to_owned(),
            initiator: initiator.name,
            security_credential: initiator.credential,
            queue_timeout_url: urls.timeout,
            result_url: urls.result,
        }
    }
}

impl TransactionStatusRequest {
    /// Queries the status of `transaction_id` on `paybill`.
    #[must_use]
    pub fn new(
        initiator: Initiator,
        paybill: &str,
        transaction_id: &str,
        urls: ResultUrls,
    ) -> Self {
        Self {
            command_id: "TransactionStatusQuery".to_owned(),
            party_a: paybill.to_owned(),
            identifier_type: 4,
            remarks: "Testing API".to_owned(),
            initiator: initiator.name,
            security_credential: initiator.credential,
            queue_timeout_url: urls.timeout,
            result_url: urls.result,
            transaction_id: transaction_id.to_owned(),
            occassion: "Test".to_owned(),
        }
    }
}

impl ReversalRequest {
    /// Builds the reversal request. Only `amount` comes from the caller.
    #[must_use]
    pub fn new(initiator: Initiator, test_msisdn: &str, amount: u64, urls: ResultUrls) -> Self {
        Self {
            command_id: "TransactionReversal".to_owned(),
            receiver_party: test_msisdn.to_owned(),
            // 1 = MSISDN, 2 = till number, 4 = shortcode
            receiver_identifier_type: 1,
            remarks: "Testing".to_owned(),
            amount,
            initiator: initiator.name,
            security_credential: initiator.credential,
            queue_timeout_url: urls.timeout,
            result_url: urls.result,
            transaction_id: REVERSAL_FIXED_TRANSACTION_ID.to_owned(),
        }
    }
}

impl StkPushRequest {
    /// Prompts `phone` to pay `amount` into the Lipa Na M-Pesa `shortcode`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a zero amount or a non-numeric phone.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shortcode: &str,
        passkey: &str,
        timestamp: GatewayTimestamp,
        amount: u64,
        phone: &str,
        callback: Url,
        reference: &str,
        description: &str,
    ) -> Result<Self, ValidationError> {
        let amount = validate_amount(amount)?;
        let phone = validate_phone(phone)?;
        Ok(Self {
            business_short_code: shortcode.to_owned(),
            password: lnmo_password(shortcode, passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_owned(),
            amount,
            party_a: phone.to_owned(),
            party_b: shortcode.to_owned(),
            phone_number: phone.to_owned(),
            callback_url: callback,
            account_reference: reference.to_owned(),
            transaction_desc: description.to_owned(),
        })
    }
}

impl StkPushQueryRequest {
    /// Queries the outcome of an STK push.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CheckoutRequestId`] for an empty id.
    pub fn new(
        shortcode: &str,
        passkey: &str,
        timestamp: GatewayTimestamp,
        checkout_request_id: &str,
    ) -> Result<Self, ValidationError> {
        if checkout_request_id.trim().is_empty() {
            return Err(ValidationError::CheckoutRequestId);
        }
        Ok(Self {
            business_short_code: shortcode.to_owned(),
            password: lnmo_password(shortcode, passkey, &timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_owned(),
        })
    }
}

/// A request body tagged with its gateway command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Business to customer disbursement.
    B2c(B2cRequest),
    /// Business to business transfer.
    B2b(B2bRequest),
    /// C2B URL registration.
    C2bRegister(C2bRegisterUrlRequest),
    /// C2B payment simulation.
    C2bSimulate(C2bSimulateRequest),
    /// Account balance query.
    AccountBalance(AccountBalanceRequest),
    /// Transaction status query.
    TransactionStatus(TransactionStatusRequest),
    /// Transaction reversal.
    Reversal(ReversalRequest),
    /// Lipa Na M-Pesa Online (STK push).
    StkPush(StkPushRequest),
    /// STK push status query.
    StkPushQuery(StkPushQueryRequest),
}

impl Payload {
    /// Path the payload is posted to, relative to the gateway host.
    #[must_use]
    pub const fn endpoint(&self) -> &'static str {
        match self {
            Self::B2c(_) => "/mpesa/b2c/v1/paymentrequest",
            Self::B2b(_) => "/mpesa/b2b/v1/paymentrequest",
            Self::C2bRegister(_) => "/mpesa/c2b/v1/registerurl",
            Self::C2bSimulate(_) => "/c2b/v1/simulate",
            Self::AccountBalance(_) => "/mpesa/accountbalance/v1/query",
            Self::TransactionStatus(_) => "/mpesa/transactionstatus/v1/query",
            Self::Reversal(_) => "/mpesa/reversal/v1/request",
            Self::StkPush(_) => "/mpesa/stkpush/v1/processrequest",
            Self::StkPushQuery(_) => "/mpesa/stkpushquery/v1/query",
        }
    }

    /// Short command name, used in logs and error context.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::B2c(_) => "POST b2c",
            Self::B2b(_) => "POST b2b",
            Self::C2bRegister(_) => "POST c2b registerurl",
            Self::C2bSimulate(_) => "POST c2b simulate",
            Self::AccountBalance(_) => "POST accountbalance",
            Self::TransactionStatus(_) => "POST transactionstatus",
            Self::Reversal(_) => "POST reversal",
            Self::StkPush(_) => "POST stkpush",
            Self::StkPushQuery(_) => "POST stkpushquery",
        }
    }
}

macro_rules! impl_from_request {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(request: $ty) -> Self {
                    Self::$variant(request)
                }
            }
        )*
    };
}

impl_from_request! {
    B2c => B2cRequest,
    B2b => B2bRequest,
    C2bRegister => C2bRegisterUrlRequest,
    C2bSimulate => C2bSimulateRequest,
    AccountBalance => AccountBalanceRequest,
    TransactionStatus => TransactionStatusRequest,
    Reversal => ReversalRequest,
    StkPush => StkPushRequest,
    StkPushQuery => StkPushQueryRequest,
}
