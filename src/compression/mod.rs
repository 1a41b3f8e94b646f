//! `permessage-deflate` (RFC 7692) offer negotiation.

pub mod deflate;

pub use deflate::{Deflater, Inflater};

use crate::token::{format_one, parse_list, TokenParams};

pub const EXTENSION_NAME: &str = "permessage-deflate";

/// A `permessage-deflate` parameter set, round-tripping through the
/// parameterized-token codec. Each window-bits field is `None` (not
/// mentioned), `Some(None)` (mentioned with no explicit value — meaning
/// "negotiable"/"default"), or `Some(Some(n))` (an explicit 8..15 value).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionOffer {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: Option<Option<u8>>,
    pub client_max_window_bits: Option<Option<u8>>,
}

impl CompressionOffer {
    /// The default offer a client sends when compression is enabled: no
    /// explicit window-bits constraints, full context takeover both ways.
    pub fn default_client_offer() -> CompressionOffer {
        CompressionOffer::default()
    }

    fn from_token_params(item: &TokenParams) -> Option<CompressionOffer> {
        if !item.name.eq_ignore_ascii_case(EXTENSION_NAME) {
            return None;
        }
        let mut offer = CompressionOffer::default();
        for (name, value) in &item.params {
            match name.to_ascii_lowercase().as_str() {
                "server_no_context_takeover" => offer.server_no_context_takeover = true,
                "client_no_context_takeover" => offer.client_no_context_takeover = true,
                "server_max_window_bits" => {
                    offer.server_max_window_bits = Some(parse_bits(value.as_deref()).ok()?)
                }
                "client_max_window_bits" => {
                    offer.client_max_window_bits = Some(parse_bits(value.as_deref()).ok()?)
                }
                _ => return None,
            }
        }
        Some(offer)
    }

    fn to_token_params(&self) -> TokenParams {
        let mut params = Vec::new();
        if self.server_no_context_takeover {
            params.push(("server_no_context_takeover".to_string(), None));
        }
        if self.client_no_context_takeover {
            params.push(("client_no_context_takeover".to_string(), None));
        }
        if let Some(bits) = self.server_max_window_bits {
            params.push((
                "server_max_window_bits".to_string(),
                bits.map(|b| b.to_string()),
            ));
        }
        if let Some(bits) = self.client_max_window_bits {
            params.push((
                "client_max_window_bits".to_string(),
                bits.map(|b| b.to_string()),
            ));
        }
        TokenParams {
            name: EXTENSION_NAME.to_string(),
            params,
        }
    }

    pub fn window_bits_or_default(bits: Option<Option<u8>>) -> u8 {
        match bits {
            Some(Some(b)) => b,
            _ => 15,
        }
    }
}

fn parse_bits(value: Option<&str>) -> Result<Option<u8>, ()> {
    match value {
        None => Ok(None),
        Some(v) => {
            let n: u8 = v.parse().map_err(|_| ())?;
            if (8..=15).contains(&n) {
                Ok(Some(n))
            } else {
                Err(())
            }
        }
    }
}

/// Parses every `permessage-deflate` offer out of a `Sec-WebSocket-Extensions`
/// header value sent by a client, in order, ignoring any other extension
/// tokens present (this crate supports no other extension).
pub fn parse_offers(header_value: &str) -> Vec<CompressionOffer> {
    parse_list(header_value)
        .iter()
        .filter_map(CompressionOffer::from_token_params)
        .collect()
}

/// The server picks the first syntactically valid offer it receives and
/// echoes back parameters it is willing to honor. `server_no_context_takeover`
/// requested by the client is always honored; the server never claims
/// `client_max_window_bits` unless the client offered it explicitly.
pub fn negotiate_server_response(offers: &[CompressionOffer]) -> Option<CompressionOffer> {
    let offer = offers.first()?.clone();
    Some(CompressionOffer {
        server_no_context_takeover: offer.server_no_context_takeover,
        client_no_context_takeover: offer.client_no_context_takeover,
        server_max_window_bits: offer.server_max_window_bits,
        client_max_window_bits: offer.client_max_window_bits,
    })
}

/// Validates that a server's chosen response is a subset of what the client
/// actually offered (§4.5's extension-mismatch check).
pub fn response_is_subset_of_offer(offer: &CompressionOffer, response: &CompressionOffer) -> bool {
    if response.server_no_context_takeover && !offer.server_no_context_takeover {
        return false;
    }
    if response.client_max_window_bits.is_some() && offer.client_max_window_bits.is_none() {
        return false;
    }
    true
}

pub fn format_header_value(offer: &CompressionOffer) -> String {
    format_one(&offer.to_token_params())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_offer() {
        let offers = parse_offers("permessage-deflate");
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0], CompressionOffer::default());
    }

    #[test]
    fn parses_offer_with_window_bits() {
        let offers = parse_offers(
            "permessage-deflate; client_max_window_bits=10; server_no_context_takeover",
        );
        let offer = &offers[0];
        assert_eq!(offer.client_max_window_bits, Some(Some(10)));
        assert!(offer.server_no_context_takeover);
    }

    #[test]
    fn server_never_claims_unoffered_client_bits() {
        let offer = CompressionOffer::default();
        let response = CompressionOffer {
            client_max_window_bits: Some(Some(10)),
            ..CompressionOffer::default()
        };
        assert!(!response_is_subset_of_offer(&offer, &response));
    }

    #[test]
    fn round_trips_through_header_formatting() {
        let offer = CompressionOffer {
            server_no_context_takeover: true,
            client_max_window_bits: Some(None),
            ..CompressionOffer::default()
        };
        let formatted = format_header_value(&offer);
        let reparsed = parse_offers(&formatted);
        assert_eq!(reparsed[0], offer);
    }
}
