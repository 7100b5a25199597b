use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::str::FromStr;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::domain::{AccountNumber, WithdrawalError, WithdrawalRequest, WithdrawalResult, MONEY_SCALE};

const ACCOUNT_NUMBER_MESSAGE: &str = "must be exactly 9 digits";
const AMOUNT_MESSAGE: &str = "must be a positive number (e.g., 100.50)";

/// Inbound body of `POST /withdrawals`. Amounts are accepted as JSON strings
/// or numbers and kept as text until validated.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequestDto {
    #[validate(required(message = "must be exactly 9 digits"), custom = "validate_account_number")]
    pub account_number: Option<String>,

    #[serde(default, deserialize_with = "amount_text")]
    #[validate(required(message = "must be a positive number (e.g., 100.50)"), custom = "validate_amount")]
    pub amount: Option<String>,

    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub account_name: Option<String>,

    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub account_type: Option<String>,

    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponseDto {
    pub account_number: String,
    pub amount_withdrawn: Decimal,
    pub current_balance: Decimal,
    pub message: String,
}

impl From<WithdrawalResult> for WithdrawalResponseDto {
    fn from(result: WithdrawalResult) -> Self {
        Self {
            account_number: result.account_number.into(),
            amount_withdrawn: result.amount_withdrawn,
            current_balance: result.current_balance,
            message: result.message.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

fn amount_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let input = Option::<AmountInput>::deserialize(deserializer)?;
    Ok(input.map(|amount| match amount {
        AmountInput::Text(text) => text,
        AmountInput::Number(number) => number.to_string(),
    }))
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

fn validate_account_number(value: &str) -> Result<(), ValidationError> {
    AccountNumber::parse(value)
        .map(|_| ())
        .map_err(|_| invalid("account_number", ACCOUNT_NUMBER_MESSAGE))
}

/// Non-negative with at most two fractional digits. Zero passes here and is
/// rejected as a business rule by the core.
fn parse_amount(value: &str) -> Option<Decimal> {
    let amount = Decimal::from_str(value.trim()).ok()?;
    (amount >= Decimal::ZERO && amount.normalize().scale() <= MONEY_SCALE).then_some(amount)
}

fn validate_amount(value: &str) -> Result<(), ValidationError> {
    parse_amount(value)
        .map(|_| ())
        .ok_or_else(|| invalid("amount", AMOUNT_MESSAGE))
}

fn json_field_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `field: message` pairs sorted by field, joined with `; `.
pub fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by_key(|(field, _)| *field);

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                format!("{}: {}", json_field_name(field), message)
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl TryFrom<WithdrawalRequestDto> for WithdrawalRequest {
    type Error = WithdrawalError;

    fn try_from(dto: WithdrawalRequestDto) -> Result<Self, Self::Error> {
        dto.validate()
            .map_err(|e| WithdrawalError::Validation(describe_validation_errors(&e)))?;

        let account_number = dto
            .account_number
            .as_deref()
            .and_then(|n| AccountNumber::parse(n).ok())
            .ok_or_else(|| WithdrawalError::Validation(format!("accountNumber: {ACCOUNT_NUMBER_MESSAGE}")))?;
        let amount = dto
            .amount
            .as_deref()
            .and_then(parse_amount)
            .ok_or_else(|| WithdrawalError::Validation(format!("amount: {AMOUNT_MESSAGE}")))?;

        Ok(WithdrawalRequest {
            account_number,
            amount,
            account_name: dto.account_name,
            account_type: dto.account_type,
            customer_id: dto.customer_id,
        })
    }
}
