pub mod manager;
pub mod signing;
pub mod verification_code;

pub use manager::{CheckResult, LoginState, Manager, ManagerSummary, Role};
pub use signing::{CorpSigning, OrgKey, SigningRecord};
pub use verification_code::{CodePurpose, VerificationCode};

// Optional DateTime<Utc> stored as BSON DateTime
pub(crate) mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => {
                let bson_dt = bson::DateTime::from_chrono(*dt);
                bson_dt.serialize(serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}
