// src/transform/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::overrides::OverrideTable;
use crate::error::RecordMalformed;

/// A feed value as it arrives: CoinCap sends numbers as strings, but plain
/// JSON numbers are accepted too. Anything else (booleans, arrays, objects)
/// lands in `Other` so that [`coerce`] can reject just that record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(serde_json::Number),
    Text(String),
    Other(Value),
}

impl FieldValue {
    /// Finite values only; `"NaN"` and `"inf"` do not count as numbers.
    fn as_f64(&self) -> Option<f64> {
        let f = match self {
            FieldValue::Number(n) => n.as_f64(),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Other(_) => None,
        };
        f.filter(|f| f.is_finite())
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Other(_) => None,
        }
    }

    /// Scalar text; `None` for booleans and containers.
    fn as_scalar(&self) -> Option<String> {
        match self {
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Other(_) => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Other(v) => v.to_string(),
        }
    }
}

/// One entry of the feed's `data` array. Every field is optional here;
/// [`coerce`] decides whether the record is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supply: Option<FieldValue>,
    #[serde(rename = "marketCapUsd", default, skip_serializing_if = "Option::is_none")]
    pub market_cap_usd: Option<FieldValue>,
    #[serde(rename = "volumeUsd24Hr", default, skip_serializing_if = "Option::is_none")]
    pub volume_usd_24hr: Option<FieldValue>,
    #[serde(rename = "priceUsd", default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<FieldValue>,
    #[serde(rename = "changePercent24Hr", default, skip_serializing_if = "Option::is_none")]
    pub change_percent_24hr: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<FieldValue>,
}

impl AssetRecord {
    /// Read one raw entry of the feed's `data` array. Only a non-object entry
    /// fails here; bad field values are left for [`coerce`].
    pub fn from_value(entry: &Value) -> Result<Self, RecordMalformed> {
        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        if !entry.is_object() {
            return Err(RecordMalformed {
                id,
                reason: format!("entry is not an object: {}", entry),
            });
        }
        serde_json::from_value(entry.clone()).map_err(|e| RecordMalformed {
            id,
            reason: e.to_string(),
        })
    }
}

/// Column order of every sink.
pub const COLUMNS: [&str; 11] = [
    "timestamp",
    "id",
    "rank",
    "symbol",
    "name",
    "supply",
    "market_cap_usd",
    "volume_usd_24hr",
    "price_usd",
    "change_percent_24hr",
    "url",
];

/// Fixed-schema output row. All records of one run share `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub timestamp: DateTime<Utc>,
    pub id: String,
    pub rank: i64,
    pub symbol: String,
    pub name: String,
    pub supply: f64,
    pub market_cap_usd: f64,
    pub volume_usd_24hr: f64,
    pub price_usd: f64,
    pub change_percent_24hr: f64,
    pub url: String,
}

/// Coerce one feed entry. The record is either complete or rejected; there
/// is no partially filled output.
pub fn coerce(
    asset: &AssetRecord,
    observed_at: DateTime<Utc>,
    overrides: &OverrideTable,
) -> Result<NormalizedRecord, RecordMalformed> {
    let id = match &asset.id {
        Some(v) => match v.as_scalar() {
            Some(id) => id,
            None => {
                return Err(RecordMalformed {
                    id: v.as_text(),
                    reason: format!("field `id` is not a string: {}", v.as_text()),
                })
            }
        },
        None => {
            return Err(RecordMalformed {
                id: "<unknown>".to_string(),
                reason: "missing field `id`".to_string(),
            })
        }
    };

    let fail = |reason: String| RecordMalformed {
        id: id.clone(),
        reason,
    };
    let missing = |name: &str| fail(format!("missing field `{}`", name));

    let text = |v: &Option<FieldValue>, name: &str| -> Result<String, RecordMalformed> {
        let v = v.as_ref().ok_or_else(|| missing(name))?;
        v.as_scalar()
            .ok_or_else(|| fail(format!("field `{}` is not a string: {}", name, v.as_text())))
    };

    let float = |v: &Option<FieldValue>, name: &str| -> Result<f64, RecordMalformed> {
        let v = v.as_ref().ok_or_else(|| missing(name))?;
        v.as_f64()
            .ok_or_else(|| fail(format!("field `{}` is not a number: {}", name, v.as_text())))
    };

    let rank = {
        let v = asset.rank.as_ref().ok_or_else(|| missing("rank"))?;
        v.as_i64()
            .ok_or_else(|| fail(format!("field `rank` is not an integer: {}", v.as_text())))?
    };

    let url = match &asset.explorer {
        Some(_) => text(&asset.explorer, "explorer")?,
        None => overrides
            .get(&id)
            .map(str::to_string)
            .ok_or_else(|| missing("explorer"))?,
    };

    Ok(NormalizedRecord {
        timestamp: observed_at,
        rank,
        symbol: text(&asset.symbol, "symbol")?,
        name: text(&asset.name, "name")?,
        supply: float(&asset.supply, "supply")?,
        market_cap_usd: float(&asset.market_cap_usd, "marketCapUsd")?,
        volume_usd_24hr: float(&asset.volume_usd_24hr, "volumeUsd24Hr")?,
        price_usd: float(&asset.price_usd, "priceUsd")?,
        change_percent_24hr: float(&asset.change_percent_24hr, "changePercent24Hr")?,
        url,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn asset(json: &str) -> AssetRecord {
        serde_json::from_str(json).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_690_000_000_000).unwrap()
    }

    #[test]
    fn test_coerce_string_fields() {
        let a = asset(
            r#"{"id":"bitcoin","rank":"1","symbol":"BTC","name":"Bitcoin","supply":"19000000",
                "marketCapUsd":"5e11","volumeUsd24Hr":"1e10","priceUsd":"26000",
                "changePercent24Hr":"0.5","explorer":"https://blockchain.info/"}"#,
        );
        let r = coerce(&a, at(), &OverrideTable::empty()).unwrap();
        assert_eq!(r.id, "bitcoin");
        assert_eq!(r.rank, 1);
        assert_eq!(r.market_cap_usd, 5e11);
        assert_eq!(r.url, "https://blockchain.info/");
        assert_eq!(r.timestamp, at());
    }

    #[test]
    fn test_coerce_accepts_json_numbers() {
        let a = asset(
            r#"{"id":"eth","rank":2,"symbol":"ETH","name":"Ethereum","supply":120000000.5,
                "marketCapUsd":2.2e11,"volumeUsd24Hr":5e9,"priceUsd":1850.25,
                "changePercent24Hr":-1.25,"explorer":"https://etherscan.io/"}"#,
        );
        let r = coerce(&a, at(), &OverrideTable::empty()).unwrap();
        assert_eq!(r.rank, 2);
        assert_eq!(r.supply, 120_000_000.5);
        assert_eq!(r.change_percent_24hr, -1.25);
    }

    #[test]
    fn test_null_field_rejected() {
        let a = asset(
            r#"{"id":"ghost","rank":"7","symbol":"GST","name":"Ghost","supply":null,
                "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"1",
                "changePercent24Hr":"1","explorer":"https://ghost/"}"#,
        );
        let e = coerce(&a, at(), &OverrideTable::empty()).unwrap_err();
        assert_eq!(e.id, "ghost");
        assert_eq!(e.reason, "missing field `supply`");
    }

    #[test]
    fn test_fractional_rank_rejected() {
        let a = asset(
            r#"{"id":"x","rank":"1.5","symbol":"X","name":"X","supply":"1",
                "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"1",
                "changePercent24Hr":"1","explorer":"https://x/"}"#,
        );
        let e = coerce(&a, at(), &OverrideTable::empty()).unwrap_err();
        assert!(e.reason.contains("rank"), "{}", e.reason);
    }

    #[test]
    fn test_garbage_number_rejected() {
        let a = asset(
            r#"{"id":"x","rank":"3","symbol":"X","name":"X","supply":"lots",
                "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"1",
                "changePercent24Hr":"1","explorer":"https://x/"}"#,
        );
        let e = coerce(&a, at(), &OverrideTable::empty()).unwrap_err();
        assert_eq!(e.reason, "field `supply` is not a number: lots");
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for bad in ["NaN", "inf", "-Infinity"] {
            let a = asset(&format!(
                r#"{{"id":"x","rank":"3","symbol":"X","name":"X","supply":"1",
                    "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"{}",
                    "changePercent24Hr":"1","explorer":"https://x/"}}"#,
                bad
            ));
            let e = coerce(&a, at(), &OverrideTable::empty()).unwrap_err();
            assert_eq!(e.reason, format!("field `priceUsd` is not a number: {}", bad));
        }
    }

    #[test]
    fn test_wrong_json_types_rejected_per_field() {
        let a = asset(
            r#"{"id":"x","rank":"3","symbol":"X","name":"X","supply":true,
                "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"1",
                "changePercent24Hr":"1","explorer":"https://x/"}"#,
        );
        let e = coerce(&a, at(), &OverrideTable::empty()).unwrap_err();
        assert_eq!(e.reason, "field `supply` is not a number: true");

        let a = asset(
            r#"{"id":"x","rank":"3","symbol":["X"],"name":"X","supply":"1",
                "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"1",
                "changePercent24Hr":"1","explorer":"https://x/"}"#,
        );
        let e = coerce(&a, at(), &OverrideTable::empty()).unwrap_err();
        assert_eq!(e.reason, r#"field `symbol` is not a string: ["X"]"#);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        let e = AssetRecord::from_value(&Value::Null).unwrap_err();
        assert_eq!(e.id, "<unknown>");
        assert_eq!(e.reason, "entry is not an object: null");
        assert!(AssetRecord::from_value(&serde_json::json!({"id": "btc", "rank": {}})).is_ok());
    }

    #[test]
    fn test_missing_id() {
        let e = coerce(&AssetRecord::default(), at(), &OverrideTable::empty()).unwrap_err();
        assert_eq!(e.id, "<unknown>");
    }

    #[test]
    fn test_override_only_when_explorer_absent() {
        let table = OverrideTable::builtin();
        let base = r#""rank":"50","symbol":"DYDX","name":"dYdX","supply":"1",
                "marketCapUsd":"1","volumeUsd24Hr":"1","priceUsd":"1","changePercent24Hr":"1""#;

        let without = asset(&format!(r#"{{"id":"dydx",{}}}"#, base));
        assert_eq!(
            coerce(&without, at(), table).unwrap().url,
            "https://dydx.foundation/"
        );

        let with = asset(&format!(
            r#"{{"id":"dydx",{},"explorer":"https://etherscan.io/token/dydx"}}"#,
            base
        ));
        assert_eq!(
            coerce(&with, at(), table).unwrap().url,
            "https://etherscan.io/token/dydx"
        );

        let unknown = asset(&format!(r#"{{"id":"nobody",{}}}"#, base));
        assert_eq!(
            coerce(&unknown, at(), table).unwrap_err().reason,
            "missing field `explorer`"
        );
    }
}
