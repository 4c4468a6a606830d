//! Chat handoff: the pre-filled text a prospective client sends to the
//! business, and the deep links that open it.
//!
//! A handoff reserves nothing. The slot it names is only as free as the
//! snapshot it was computed from.

use std::fmt;

use rust_decimal::Decimal;

use crate::clock;
use crate::model::Ms;

const CHAT_BASE: &str = "https://wa.me/";
const FALLBACK_BUSINESS_PHONE: &str = "5511999999999";
const CLIENT_COUNTRY_CODE: &str = "55";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Name or phone left blank.
    MissingContact,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::MissingContact => write!(f, "client name and phone are required"),
        }
    }
}

impl std::error::Error for MessageError {}

#[derive(Debug, Clone)]
pub struct BookingRequest<'a> {
    pub service_name: &'a str,
    pub start: Ms,
    pub client_name: &'a str,
    pub client_phone: &'a str,
    /// Present only when a deposit is required for this booking.
    pub deposit_amount: Option<Decimal>,
}

pub fn compose(request: &BookingRequest<'_>) -> Result<String, MessageError> {
    let name = request.client_name.trim();
    let phone = request.client_phone.trim();
    if name.is_empty() || phone.is_empty() {
        return Err(MessageError::MissingContact);
    }

    let mut text = format!(
        "Olá! Gostaria de agendar {} para o dia {} às {}.\n\nMeus Dados:\nNome: {}\nTelefone: {}",
        request.service_name,
        clock::format_date(request.start),
        clock::format_time(request.start),
        name,
        phone,
    );
    if let Some(amount) = request.deposit_amount {
        text.push_str(&format!("\nEstou ciente do sinal de reserva de R$ {}.", money(amount)));
    }
    Ok(text)
}

/// Deep link to the business chat. Falls back to the placeholder number
/// when the owner has not configured a phone.
pub fn link(business_phone: Option<&str>, text: &str) -> String {
    let digits = business_phone.map(digits_only).unwrap_or_default();
    let target = if digits.is_empty() {
        FALLBACK_BUSINESS_PHONE
    } else {
        digits.as_str()
    };
    format!("{CHAT_BASE}{target}?text={}", urlencoding::encode(text))
}

/// Staff reminder asking a client to confirm today's visit.
pub fn reminder(client_name: &str, start: Ms) -> String {
    format!(
        "Olá {}, confirmando seu horário hoje às {}?",
        client_name.trim(),
        clock::format_time(start)
    )
}

/// Deep link to a client's chat; client numbers are stored without the
/// country code.
pub fn client_link(client_phone: &str, text: &str) -> String {
    format!(
        "{CHAT_BASE}{CLIENT_COUNTRY_CODE}{}?text={}",
        digits_only(client_phone),
        urlencoding::encode(text)
    )
}

pub fn digits_only(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Two decimals, dot separator.
fn money(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, MINUTE_MS};
    use std::str::FromStr;

    fn request<'a>(deposit: Option<Decimal>) -> BookingRequest<'a> {
        BookingRequest {
            service_name: "Corte Feminino",
            start: 14 * HOUR_MS + 30 * MINUTE_MS,
            client_name: "Ana",
            client_phone: "(11) 98888-7777",
            deposit_amount: deposit,
        }
    }

    #[test]
    fn renders_without_deposit() {
        let text = compose(&request(None)).unwrap();
        assert_eq!(
            text,
            "Olá! Gostaria de agendar Corte Feminino para o dia 01/01/1970 às 14:30.\n\n\
             Meus Dados:\nNome: Ana\nTelefone: (11) 98888-7777"
        );
    }

    #[test]
    fn renders_deposit_line_with_two_decimals() {
        let text = compose(&request(Some(Decimal::from(36)))).unwrap();
        assert!(text.ends_with("Telefone: (11) 98888-7777\nEstou ciente do sinal de reserva de R$ 36.00."));
        let odd = compose(&request(Some(Decimal::from_str("12.5").unwrap()))).unwrap();
        assert!(odd.ends_with("R$ 12.50."));
    }

    #[test]
    fn blank_contact_is_rejected() {
        let mut req = request(None);
        req.client_name = "   ";
        assert_eq!(compose(&req), Err(MessageError::MissingContact));
        let mut req = request(None);
        req.client_phone = "";
        assert_eq!(compose(&req), Err(MessageError::MissingContact));
    }

    #[test]
    fn link_strips_non_digits_and_encodes() {
        let url = link(Some("+55 (21) 3333-4444"), "Olá! a&b");
        assert_eq!(url, "https://wa.me/552133334444?text=Ol%C3%A1%21%20a%26b");
    }

    #[test]
    fn link_falls_back_without_phone() {
        assert!(link(None, "x").starts_with("https://wa.me/5511999999999?text="));
        assert!(link(Some("n/a"), "x").starts_with("https://wa.me/5511999999999?text="));
    }

    #[test]
    fn reminder_targets_client_with_country_code() {
        let text = reminder("Bia ", 9 * HOUR_MS);
        assert_eq!(text, "Olá Bia, confirmando seu horário hoje às 09:00?");
        assert!(client_link("11 91234-5678", &text).starts_with("https://wa.me/5511912345678?text=Ol%C3%A1%20Bia"));
    }
}
