//! Whitespace tokenizer and column decoder for property listings.
//!
//! The listing protocol is one line per dataset, columns separated by runs
//! of tab/space, in request order, with `-` standing for "unset". There is
//! no escaping: a property value that itself contains whitespace shifts
//! every following column and the decoder silently misaligns. That is a
//! structural limit of the protocol, not something this parser detects;
//! property values written by this tool must never contain whitespace.

use crate::error::StoreError;

use super::{PropertyKind, PropertyRow, PropertySpec, PropertyValue};

/// Largest value an integer column may hold, matching the platform-int
/// bound of the listing protocol.
const INTEGER_MAX: u64 = i32::MAX as u64;

/// Splits captured text into fixed-width token rows.
///
/// Tokens are consumed in groups of `width`; a trailing group with fewer
/// than `width` tokens is dropped, the same way a scan that runs out of
/// columns mid-row ends without emitting it.
pub(crate) fn rows(text: &str, width: usize) -> Vec<Vec<&str>> {
    debug_assert!(width > 0);
    let mut out = Vec::new();
    let mut row = Vec::with_capacity(width);
    for token in text.split_whitespace() {
        row.push(token);
        if row.len() == width {
            out.push(std::mem::replace(&mut row, Vec::with_capacity(width)));
        }
    }
    out
}

/// Decodes one row's value columns against the requested property list.
///
/// `tokens` must hold exactly one token per requested property; the caller
/// guarantees this by construction of the row width.
pub(crate) fn decode_row(
    props: &[PropertySpec],
    tokens: &[&str],
) -> Result<PropertyRow, StoreError> {
    debug_assert_eq!(props.len(), tokens.len());

    let mut values = Vec::with_capacity(props.len());
    for (spec, token) in props.iter().zip(tokens) {
        values.push(decode_value(spec, token)?);
    }
    Ok(PropertyRow { values })
}

fn decode_value(spec: &PropertySpec, token: &str) -> Result<PropertyValue, StoreError> {
    match spec.kind {
        PropertyKind::Text { capacity } => {
            // Over-capacity values are truncated, not rejected.
            let text: String = token.chars().take(capacity).collect();
            Ok(PropertyValue::Text(text))
        }
        PropertyKind::Integer => {
            if token == "-" {
                return Ok(PropertyValue::Integer(0));
            }
            let parsed = token.parse::<u64>().ok().filter(|&n| n <= INTEGER_MAX);
            match parsed {
                Some(n) => Ok(PropertyValue::Integer(n)),
                None => Err(StoreError::IntegerField {
                    property: spec.name.clone(),
                    value: token.to_string(),
                }),
            }
        }
    }
}
