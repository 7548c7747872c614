//! Wire record normalization.
//!
//! The live tap delivers trades in three shapes, tried in this order:
//! 1. Delimited: `YYYYMMDD|HHMMSS|X|CODE|BOARD|TYPE|PRICE|VOL`, either as a bare
//!    JSON string or as the `raw` field of an envelope.
//! 2. Structured: an envelope whose `raw` (or `trade`) is an object.
//! 3. Flat: a plain object carrying the trade fields directly.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use footprint_core::config::IngestConfig;
use footprint_core::{CanonicalTrade, TimestampMs};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const INSTRUMENT_KEYS: &[&str] = &["code", "symbol", "ticker", "kode"];
const BOARD_KEYS: &[&str] = &["board", "papan"];
const PRICE_KEYS: &[&str] = &["price", "last", "harga"];
const QTY_KEYS: &[&str] = &["volume", "vol", "qty", "amount"];
const TS_KEYS: &[&str] = &["ts", "timestamp"];
const DEFAULT_SOURCE: &str = "unknown";
const MIN_DELIMITED_TOKENS: usize = 8;

/// Why a record was not turned into a canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Not a string or object, or a string without delimiters.
    UnknownShape,
    /// Delimited record with fewer than eight tokens.
    TooFewTokens,
    MissingInstrument,
    /// Board other than the regular market.
    OffBoard,
    BadPrice,
    BadQuantity,
    /// Timestamp outside the representable calendar range.
    BadTimestamp,
}

/// Decoded wire shape, borrowed from the raw record.
#[derive(Debug)]
enum WireRecord<'a> {
    Delimited {
        line: &'a str,
        envelope: Option<&'a Map<String, Value>>,
    },
    Structured {
        payload: &'a Map<String, Value>,
        /// Payload came from the envelope's `raw` field.
        from_raw: bool,
        envelope: &'a Map<String, Value>,
    },
    Flat(&'a Map<String, Value>),
}

impl<'a> WireRecord<'a> {
    fn decode(raw: &'a Value) -> Option<Self> {
        match raw {
            Value::String(line) if line.contains('|') => Some(WireRecord::Delimited {
                line,
                envelope: None,
            }),
            Value::Object(envelope) => {
                let fmt = envelope.get("fmt").and_then(Value::as_str).unwrap_or("");
                let inner = envelope.get("raw");

                if fmt == "pipe" || matches!(inner, Some(Value::String(s)) if s.contains('|')) {
                    return match inner {
                        Some(Value::String(line)) => Some(WireRecord::Delimited {
                            line,
                            envelope: Some(envelope),
                        }),
                        _ => None,
                    };
                }

                let trade = envelope.get("trade").and_then(Value::as_object);
                if matches!(fmt, "obj" | "obj+rawpipe")
                    || matches!(inner, Some(Value::Object(_)))
                    || trade.is_some()
                {
                    let (payload, from_raw) = match inner {
                        Some(Value::Object(map)) => (map, true),
                        _ => (trade.unwrap_or(envelope), false),
                    };
                    return Some(WireRecord::Structured {
                        payload,
                        from_raw,
                        envelope,
                    });
                }

                Some(WireRecord::Flat(envelope))
            }
            _ => None,
        }
    }
}

/// Fields common to every shape before validation.
struct Extracted {
    ts_ms: TimestampMs,
    instrument: String,
    board: String,
    price: f64,
    qty: f64,
    src: String,
}

/// Turns raw wire records into canonical trade events.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    regular_board: String,
    exchange_offset: FixedOffset,
}

impl Canonicalizer {
    /// Create a canonicalizer from ingest configuration.
    pub fn new(config: &IngestConfig) -> Self {
        let exchange_offset =
            FixedOffset::east_opt(config.exchange_utc_offset_secs).unwrap_or_else(|| Utc.fix());
        Self {
            regular_board: config.regular_board.clone(),
            exchange_offset,
        }
    }

    /// Normalize a record, or `None` if it is malformed.
    ///
    /// `received_ms` stands in for the event time when the record carries none.
    pub fn normalize(&self, raw: &Value, received_ms: TimestampMs) -> Option<CanonicalTrade> {
        match self.decode(raw, received_ms) {
            Ok(cte) => Some(cte),
            Err(reason) => {
                tracing::trace!(?reason, "rejected trade record");
                None
            }
        }
    }

    /// Normalize a record, reporting why it was rejected.
    pub fn decode(&self, raw: &Value, received_ms: TimestampMs) -> Result<CanonicalTrade, Rejection> {
        let record = WireRecord::decode(raw).ok_or(Rejection::UnknownShape)?;

        let (fields, hash_key) = match record {
            WireRecord::Delimited { line, envelope } => {
                let fields = self.extract_delimited(line, envelope, received_ms)?;
                let key = format!("{}|pipe|{}", fields.src, line);
                (fields, key)
            }
            WireRecord::Structured {
                payload,
                from_raw,
                envelope,
            } => {
                let fields = self.extract_object(payload, envelope, received_ms);
                let key = if from_raw {
                    let canonical = serde_json::to_string(payload).unwrap_or_default();
                    format!("{}|obj|{}", fields.src, canonical)
                } else {
                    tuple_key(&fields)
                };
                (fields, key)
            }
            WireRecord::Flat(map) => {
                let fields = self.extract_object(map, map, received_ms);
                let key = tuple_key(&fields);
                (fields, key)
            }
        };

        self.validate(&fields)?;

        CanonicalTrade::new(
            fields.ts_ms,
            fields.instrument,
            fields.board,
            fields.price,
            fields.qty,
            fields.src,
            content_hash(&hash_key),
        )
        .ok_or(Rejection::BadTimestamp)
    }

    fn extract_delimited(
        &self,
        line: &str,
        envelope: Option<&Map<String, Value>>,
        received_ms: TimestampMs,
    ) -> Result<Extracted, Rejection> {
        let tokens: Vec<&str> = line.split('|').collect();
        if tokens.len() < MIN_DELIMITED_TOKENS {
            return Err(Rejection::TooFewTokens);
        }

        // Exchange time wins over receipt time so replayed batches bucket correctly.
        let ts_ms = self
            .exchange_timestamp(tokens[0], tokens[1])
            .unwrap_or_else(|| envelope_ts(envelope, received_ms));

        Ok(Extracted {
            ts_ms,
            instrument: tokens[3].to_string(),
            board: tokens[4].to_string(),
            price: parse_number(tokens[6]).unwrap_or(f64::NAN),
            qty: parse_number(tokens[7]).unwrap_or(f64::NAN),
            src: envelope_src(envelope),
        })
    }

    fn extract_object(
        &self,
        payload: &Map<String, Value>,
        envelope: &Map<String, Value>,
        received_ms: TimestampMs,
    ) -> Extracted {
        Extracted {
            ts_ms: envelope_ts(Some(envelope), received_ms),
            instrument: first_str(payload, INSTRUMENT_KEYS).unwrap_or_default().to_string(),
            board: first_str(payload, BOARD_KEYS)
                .unwrap_or(self.regular_board.as_str())
                .to_string(),
            price: first_number(payload, PRICE_KEYS).unwrap_or(f64::NAN),
            qty: first_number(payload, QTY_KEYS).unwrap_or(f64::NAN),
            src: envelope_src(Some(envelope)),
        }
    }

    /// Parse `YYYYMMDD` + `HHMMSS` in exchange local time.
    fn exchange_timestamp(&self, date: &str, time: &str) -> Option<TimestampMs> {
        if date.len() != 8 || time.len() != 6 {
            return None;
        }
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        let time = NaiveTime::parse_from_str(time, "%H%M%S").ok()?;
        let local = NaiveDateTime::new(date, time);
        self.exchange_offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.timestamp_millis())
    }

    fn validate(&self, fields: &Extracted) -> Result<(), Rejection> {
        if fields.instrument.is_empty() {
            return Err(Rejection::MissingInstrument);
        }
        if fields.board != self.regular_board {
            return Err(Rejection::OffBoard);
        }
        if !fields.price.is_finite() {
            return Err(Rejection::BadPrice);
        }
        if !fields.qty.is_finite() || fields.qty <= 0.0 {
            return Err(Rejection::BadQuantity);
        }
        Ok(())
    }
}

/// Hex SHA-256 of a dedup key.
pub fn content_hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn tuple_key(fields: &Extracted) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        fields.instrument, fields.ts_ms, fields.price, fields.qty, fields.src
    )
}

fn envelope_ts(envelope: Option<&Map<String, Value>>, received_ms: TimestampMs) -> TimestampMs {
    envelope
        .and_then(|map| first_number(map, TS_KEYS))
        .filter(|ts| ts.is_finite())
        .map(|ts| ts as TimestampMs)
        .unwrap_or(received_ms)
}

fn envelope_src(envelope: Option<&Map<String, Value>>) -> String {
    envelope
        .and_then(|map| first_str(map, &["src"]))
        .unwrap_or(DEFAULT_SOURCE)
        .to_string()
}

/// First key holding a non-empty value.
fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| map.get(*k)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    first_present(map, keys).and_then(Value::as_str)
}

fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match first_present(map, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // 2024-03-05 02:30:15 UTC
    const T: i64 = 1709605815000;

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(&IngestConfig::default())
    }

    #[test]
    fn test_delimited_uses_exchange_time() {
        let c = canonicalizer();
        // 09:30:15 at UTC+7 is 02:30:15 UTC.
        let raw = json!({"v": 2, "fmt": "pipe", "src": "tap", "ts": 1, "raw": "20240305|093015|0|BBCA|RG|B|9000|100"});
        let cte = c.normalize(&raw, 42).unwrap();

        assert_eq!(cte.ts_ms, T);
        assert_eq!(cte.date_utc, "2024-03-05");
        assert_eq!(cte.time_utc, "023015");
        assert_eq!(cte.instrument, "BBCA");
        assert_eq!(cte.price, 9000.0);
        assert_eq!(cte.qty, 100.0);
        assert_eq!(cte.src, "tap");
        assert_eq!(
            cte.hash_id,
            content_hash("tap|pipe|20240305|093015|0|BBCA|RG|B|9000|100")
        );
    }

    #[test]
    fn test_delimited_bad_time_falls_back_to_envelope() {
        let c = canonicalizer();
        let raw = json!({"raw": "2024-3-5|0930|0|BBCA|RG|B|9000|100", "ts": T});
        assert_eq!(c.normalize(&raw, 0).unwrap().ts_ms, T);
    }

    #[test]
    fn test_bare_delimited_string() {
        let c = canonicalizer();
        let raw = json!("20240305|093015|0|TLKM|RG|S|3500|25");
        let cte = c.normalize(&raw, 0).unwrap();
        assert_eq!(cte.instrument, "TLKM");
        assert_eq!(cte.src, "unknown");
    }

    #[test]
    fn test_delimited_too_few_tokens() {
        let c = canonicalizer();
        let raw = json!({"fmt": "pipe", "raw": "20240305|093015|0|BBCA|RG|B|9000"});
        assert_eq!(c.decode(&raw, 0), Err(Rejection::TooFewTokens));
    }

    #[test]
    fn test_non_regular_board_rejected() {
        let c = canonicalizer();
        let raw = json!("20240305|093015|0|BBCA|NG|B|9000|100");
        assert_eq!(c.decode(&raw, 0), Err(Rejection::OffBoard));
    }

    #[test]
    fn test_structured_fallback_fields() {
        let c = canonicalizer();
        let raw = json!({"fmt": "obj", "src": "ws", "ts": T, "raw": {"kode": "ASII", "last": "5100", "vol": 3}});
        let cte = c.normalize(&raw, 0).unwrap();
        assert_eq!(cte.instrument, "ASII");
        assert_eq!(cte.board, "RG");
        assert_eq!(cte.price, 5100.0);
        assert_eq!(cte.qty, 3.0);
        assert_eq!(cte.ts_ms, T);
    }

    #[test]
    fn test_structured_hash_is_canonical() {
        let c = canonicalizer();
        let a = json!({"src": "ws", "ts": T, "raw": {"code": "ASII", "price": 5100, "volume": 3}});
        let b = json!({"src": "ws", "ts": T + 5, "raw": {"volume": 3, "price": 5100, "code": "ASII"}});
        assert_eq!(
            c.normalize(&a, 0).unwrap().hash_id,
            c.normalize(&b, 0).unwrap().hash_id
        );
    }

    #[test]
    fn test_trade_field_payload() {
        let c = canonicalizer();
        let raw = json!({"ts": T, "trade": {"symbol": "BBRI", "price": 4500, "qty": 10, "papan": "RG"}});
        let cte = c.normalize(&raw, 0).unwrap();
        assert_eq!(cte.instrument, "BBRI");
        assert_eq!(
            cte.hash_id,
            content_hash(&format!("BBRI|{}|4500|10|unknown", T))
        );
    }

    #[test]
    fn test_flat_record() {
        let c = canonicalizer();
        let raw = json!({"ticker": "BBCA", "price": 9000, "qty": 100, "ts": T});
        let cte = c.normalize(&raw, 0).unwrap();
        assert_eq!(cte.instrument, "BBCA");
        assert_eq!(cte.qty, 100.0);
        assert_eq!(
            cte.hash_id,
            content_hash(&format!("BBCA|{}|9000|100|unknown", T))
        );
    }

    #[test]
    fn test_flat_without_ts_uses_receipt_time() {
        let c = canonicalizer();
        let raw = json!({"ticker": "BBCA", "price": 9000, "amount": 1});
        assert_eq!(c.normalize(&raw, T).unwrap().ts_ms, T);
    }

    #[test]
    fn test_missing_quantity_rejected() {
        let c = canonicalizer();
        let raw = json!({"ticker": "BBCA", "price": 9000, "ts": T});
        assert_eq!(c.decode(&raw, 0), Err(Rejection::BadQuantity));
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let c = canonicalizer();
        let raw = json!({"ticker": "BBCA", "price": 9000, "vol": 0, "ts": T});
        assert_eq!(c.decode(&raw, 0), Err(Rejection::BadQuantity));
    }

    #[test]
    fn test_bad_price_and_instrument() {
        let c = canonicalizer();
        assert_eq!(
            c.decode(&json!({"ticker": "BBCA", "price": "abc", "vol": 1}), 0),
            Err(Rejection::BadPrice)
        );
        assert_eq!(
            c.decode(&json!({"price": 1, "vol": 1}), 0),
            Err(Rejection::MissingInstrument)
        );
    }

    #[test]
    fn test_unknown_shapes() {
        let c = canonicalizer();
        assert_eq!(c.decode(&json!(42), 0), Err(Rejection::UnknownShape));
        assert_eq!(c.decode(&json!("no delimiters"), 0), Err(Rejection::UnknownShape));
        assert_eq!(
            c.decode(&json!({"fmt": "pipe", "raw": {"code": "BBCA"}}), 0),
            Err(Rejection::UnknownShape)
        );
    }
}
