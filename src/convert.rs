//! Value converter (C9). Maps one upstream-encoded [`ColumnValue`] into a
//! target-ready literal based on its target type id (spec.md §4.5).
//!
//! Kept free of SPI: the only backend dependency is [`Applier::evaluate_transform_expression`]
//! for per-column transform expressions, which is why this module takes the
//! applier and rule store as parameters instead of reaching for globals.

use base64::Engine;

use crate::applier::Applier;
use crate::dml::{ColumnValue, Timerep};
use crate::error::IngestError;
use crate::rules::RuleStore;

// Oid values for the target types this converter special-cases. Mirrors
// PostgreSQL's builtin type oids (see pg_type.dat); kept as local constants
// so `convert.rs` stays testable without linking against `pgrx::pg_sys`.
pub mod type_oid {
    pub const BOOL: i32 = 16;
    pub const BYTEA: i32 = 17;
    pub const CHAR: i32 = 18;
    pub const INT8: i32 = 20;
    pub const INT2: i32 = 21;
    pub const INT4: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const JSONB: i32 = 3802;
    pub const FLOAT4: i32 = 700;
    pub const FLOAT8: i32 = 701;
    pub const VARCHAR: i32 = 1043;
    pub const BPCHAR: i32 = 1042;
    pub const DATE: i32 = 1082;
    pub const TIME: i32 = 1083;
    pub const TIMESTAMP: i32 = 1114;
    pub const TIMESTAMPTZ: i32 = 1184;
    pub const NUMERIC: i32 = 1700;
    pub const UUID: i32 = 2950;
    pub const BIT: i32 = 1560;
    pub const VARBIT: i32 = 1562;
    pub const MONEY: i32 = 790;
}

/// Converts `colval.value` to its target-ready text form, `None` for SQL
/// NULL, applying a per-column transform expression if the rule store has
/// one for `remote_object_id.remote_column_name` (spec.md §4.5, §4.6).
pub fn convert(
    colval: &ColumnValue,
    add_quote: bool,
    remote_object_id: &str,
    rules: &RuleStore,
    applier: &mut dyn Applier,
) -> Result<Option<String>, IngestError> {
    let Some(raw) = &colval.value else {
        return Ok(None);
    };

    let converted = convert_by_type(colval, raw, add_quote)?;

    let qualified_column = format!("{remote_object_id}.{}", colval.remote_column_name);
    let Some(expr) = rules.lookup_expression(&qualified_column) else {
        return Ok(Some(converted));
    };

    let (wkb, srid) = extract_geometry(raw);
    let escaped = escape_single_quote(raw);
    let transformed = applier
        .evaluate_transform_expression(expr, &escaped, wkb.as_deref(), srid.as_deref())
        .map_err(|e| IngestError::ExecutionFailure(e.to_string()))?;
    Ok(Some(transformed))
}

fn convert_by_type(colval: &ColumnValue, raw: &str, add_quote: bool) -> Result<String, IngestError> {
    use type_oid::*;

    match colval.data_type {
        BOOL | INT8 | INT2 | INT4 | FLOAT4 | FLOAT8 => Ok(raw.to_string()),
        MONEY | NUMERIC => convert_numeric(colval, raw),
        BPCHAR | TEXT | VARCHAR | JSONB | UUID | TIMESTAMPTZ => {
            Ok(quote_if(&escape_single_quote(raw), add_quote))
        }
        BIT | VARBIT => convert_bit(colval, raw, add_quote),
        DATE => convert_date(colval, raw, add_quote),
        // carries either an epoch integer or, for ZONEDTIMESTAMP, a string
        // that passes through unchanged (spec.md §4.5).
        TIMESTAMP => convert_timestamp(colval, raw, add_quote),
        TIME => convert_time(colval, raw, add_quote),
        BYTEA => convert_bytea(raw),
        _ => Ok(quote_if(&escape_single_quote(raw), add_quote)),
    }
}

/// NUMERIC/MONEY: base64-decoded big-endian two's-complement integer,
/// rendered with a decimal point `scale` digits from the right. MONEY
/// defaults to scale 4 when none is given (spec.md §4.5).
fn convert_numeric(colval: &ColumnValue, raw: &str) -> Result<String, IngestError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| IngestError::MalformedEnvelope(format!("invalid base64 numeric: {e}")))?;
    let value = derive_value_from_bytes(&bytes);

    let mut scale = colval.scale;
    if scale <= 0 && colval.data_type == type_oid::MONEY {
        scale = 4;
    }

    if scale <= 0 {
        return Ok(value.to_string());
    }

    let negative = value < 0;
    let digits = value.unsigned_abs().to_string();
    let scale = scale as usize;

    let body = if digits.len() > scale {
        let split = digits.len() - scale;
        format!("{}.{}", &digits[..split], &digits[split..])
    } else {
        format!("0.{}{}", "0".repeat(scale - digits.len()), digits)
    };

    Ok(if negative { format!("-{body}") } else { body })
}

fn derive_value_from_bytes(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    if let Some(&first) = bytes.first() {
        if first & 0x80 != 0 {
            value -= 1i64 << (bytes.len() * 8);
        }
    }
    value
}

/// BIT/VARBIT: base64-decoded bytes, byte-reversed, rendered MSB-first,
/// zero-stripped, then left-padded to `typemod` (spec.md §4.5, §8 invariant 7).
fn convert_bit(colval: &ColumnValue, raw: &str, add_quote: bool) -> Result<String, IngestError> {
    let mut bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| IngestError::MalformedEnvelope(format!("invalid base64 bit value: {e}")))?;
    bytes.reverse();

    let mut bits: String = bytes.iter().map(|b| format!("{:08b}", b)).collect();
    let trimmed = bits.trim_start_matches('0');
    bits = if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    };

    if colval.typemod > 0 && bits.len() < colval.typemod as usize {
        bits = format!("{}{}", "0".repeat(colval.typemod as usize - bits.len()), bits);
    }

    Ok(if add_quote { format!("'b{bits}'") } else { bits })
}

const DAY_SECS: i64 = 86_400;

fn convert_date(colval: &ColumnValue, raw: &str, add_quote: bool) -> Result<String, IngestError> {
    let input: i64 = raw
        .parse()
        .map_err(|_| IngestError::MalformedEnvelope(format!("non-numeric DATE value: {raw}")))?;

    let days = match colval.timerep {
        Timerep::Date => input,
        Timerep::Timestamp => input / 86_400_000,
        Timerep::MicroTimestamp => input / 86_400_000_000,
        Timerep::NanoTimestamp => input / 86_400_000_000_000,
        Timerep::Undef => {
            return Err(IngestError::UndefinedTimerep {
                column: colval.name.clone(),
            })
        }
        _ => {
            return Err(IngestError::UndefinedTimerep {
                column: colval.name.clone(),
            })
        }
    };

    let date = epoch_date() + chrono::Duration::days(days);
    let text = date.format("%Y-%m-%d").to_string();
    Ok(quote_if(&text, add_quote))
}

fn convert_timestamp(colval: &ColumnValue, raw: &str, add_quote: bool) -> Result<String, IngestError> {
    if colval.timerep == Timerep::ZonedTimestamp {
        return Ok(quote_if(&escape_single_quote(raw), add_quote));
    }

    let input: i64 = raw
        .parse()
        .map_err(|_| IngestError::MalformedEnvelope(format!("non-numeric TIMESTAMP value: {raw}")))?;

    let (secs, nanos) = match colval.timerep {
        Timerep::Timestamp => (input.div_euclid(1_000), (input.rem_euclid(1_000) * 1_000_000) as u32),
        Timerep::MicroTimestamp => (input.div_euclid(1_000_000), (input.rem_euclid(1_000_000) * 1_000) as u32),
        Timerep::NanoTimestamp => (input.div_euclid(1_000_000_000), input.rem_euclid(1_000_000_000) as u32),
        Timerep::Undef => {
            return Err(IngestError::UndefinedTimerep {
                column: colval.name.clone(),
            })
        }
        _ => {
            return Err(IngestError::UndefinedTimerep {
                column: colval.name.clone(),
            })
        }
    };

    let naive = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| IngestError::MalformedEnvelope(format!("out-of-range TIMESTAMP value: {raw}")))?;

    let text = if colval.typemod > 0 {
        naive.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    } else {
        naive.format("%Y-%m-%dT%H:%M:%S").to_string()
    };
    Ok(quote_if(&text, add_quote))
}

fn convert_time(colval: &ColumnValue, raw: &str, add_quote: bool) -> Result<String, IngestError> {
    let input: i64 = raw
        .parse()
        .map_err(|_| IngestError::MalformedEnvelope(format!("non-numeric TIME value: {raw}")))?;

    let (secs_since_midnight, nanos) = match colval.timerep {
        Timerep::Time => (input.div_euclid(1_000), (input.rem_euclid(1_000) * 1_000_000) as u32),
        Timerep::MicroTime => (input.div_euclid(1_000_000), (input.rem_euclid(1_000_000) * 1_000) as u32),
        Timerep::NanoTime => (input.div_euclid(1_000_000_000), input.rem_euclid(1_000_000_000) as u32),
        Timerep::Undef => {
            return Err(IngestError::UndefinedTimerep {
                column: colval.name.clone(),
            })
        }
        _ => {
            return Err(IngestError::UndefinedTimerep {
                column: colval.name.clone(),
            })
        }
    };

    let secs = secs_since_midnight.rem_euclid(DAY_SECS);
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;

    let text = if colval.typemod > 0 {
        let micros = nanos / 1_000;
        format!("{h:02}:{m:02}:{s:02}.{micros:06}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    };
    Ok(quote_if(&text, add_quote))
}

fn convert_bytea(raw: &str) -> Result<String, IngestError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| IngestError::MalformedEnvelope(format!("invalid base64 bytea value: {e}")))?;
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("'\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out.push('\'');
    Ok(out)
}

fn epoch_date() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid calendar date")
}

fn quote_if(s: &str, add_quote: bool) -> String {
    if add_quote {
        format!("'{s}'")
    } else {
        s.to_string()
    }
}

fn escape_single_quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// Pulls `wkb`/`srid` out of a geometry value shaped like
/// `{"wkb":"...","srid":...}` (spec.md §4.5), returning `(None, None)` if
/// `raw` is not JSON-shaped geometry.
fn extract_geometry(raw: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return (None, None);
    };
    let Some(obj) = value.as_object() else {
        return (None, None);
    };
    if !obj.contains_key("wkb") {
        return (None, None);
    }
    let wkb = obj
        .get("wkb")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "0".to_string());
    let srid = obj
        .get("srid")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "0".to_string());
    (Some(wkb), Some(srid))
}
