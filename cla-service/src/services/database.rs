use crate::models::{CorpSigning, Manager, OrgKey, SigningRecord, VerificationCode};
use crate::services::error::ServiceError;
use crate::services::store::{
    AppendGuard, CodeStore, ManagerFilter, ManagerUpdate, SigningStore, UpdateOutcome,
    WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    Client as MongoClient, Collection, Database, IndexModel,
    bson::{self, Bson, DateTime as BsonDateTime, Document, doc},
    error::{ErrorKind, WriteFailure},
    options::{
        FindOneAndUpdateOptions, IndexOptions, ReplaceOptions, ReturnDocument, UpdateOptions,
    },
};
use service_core::error::AppError;
use std::future::Future;
use std::time::Duration;

const SIGNINGS: &str = "corp_signings";
const CODES: &str = "verification_codes";
const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct ClaDb {
    db: Database,
    timeout: Duration,
}

impl ClaDb {
    pub async fn connect(uri: &str, database: &str, timeout_seconds: u64) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self {
            db,
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for cla-service");

        // One signing record per link
        let link_index = IndexModel::builder()
            .keys(doc! { "platform": 1, "org_id": 1, "repo_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("link_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.signings()
            .create_index(link_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create link index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        // Expired codes are swept a day after expiry so late consumers still see "expired"
        let expiry_index = IndexModel::builder()
            .keys(doc! { "expiry_utc": 1 })
            .options(
                IndexOptions::builder()
                    .name("expiry_utc_ttl_idx".to_string())
                    .expire_after(Duration::from_secs(24 * 3600))
                    .build(),
            )
            .build();

        self.codes()
            .create_index(expiry_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create expiry_utc index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        tracing::info!("MongoDB indexes created");
        Ok(())
    }

    fn signings(&self) -> Collection<SigningRecord> {
        self.db.collection(SIGNINGS)
    }

    fn codes(&self) -> Collection<VerificationCode> {
        self.db.collection(CODES)
    }

    /// Bounds a driver call by the configured timeout, leaving driver errors to the caller.
    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<mongodb::error::Result<T>, ServiceError>
    where
        F: Future<Output = mongodb::error::Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            tracing::error!(
                operation,
                timeout_seconds = self.timeout.as_secs(),
                "Store operation timed out"
            );
            ServiceError::StoreTimeout(self.timeout.as_secs())
        })
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = mongodb::error::Result<T>>,
    {
        self.timed(operation, fut).await?.map_err(|e| {
            tracing::error!(operation, error = %e, "Store operation failed");
            ServiceError::Database(e)
        })
    }

    async fn record_exists(&self, key: &OrgKey) -> Result<bool, ServiceError> {
        let count = self
            .run(
                "count_record",
                self.signings().count_documents(key_filter(key), None),
            )
            .await?;
        Ok(count > 0)
    }

    /// An element-level miss is a normal outcome; a missing record is not.
    async fn unmatched_outcome(&self, key: &OrgKey) -> Result<UpdateOutcome, ServiceError> {
        if self.record_exists(key).await? {
            Ok(UpdateOutcome::default())
        } else {
            Err(ServiceError::NoDbRecord)
        }
    }

    /// Zero matched documents on a guarded write is either a missing record or a
    /// failed guard.
    async fn guarded_outcome(&self, key: &OrgKey, matched: u64) -> Result<WriteOutcome, ServiceError> {
        if matched > 0 {
            return Ok(WriteOutcome::Applied);
        }
        if self.record_exists(key).await? {
            Ok(WriteOutcome::Rejected)
        } else {
            Err(ServiceError::NoDbRecord)
        }
    }
}

fn key_filter(key: &OrgKey) -> Document {
    doc! {
        "platform": key.platform.as_str(),
        "org_id": key.org_id.as_str(),
        "repo_id": key.repo_id.as_str(),
    }
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<Bson, ServiceError> {
    bson::to_bson(value).map_err(|e| ServiceError::Internal(anyhow::anyhow!("BSON encode: {}", e)))
}

/// Element condition for `$pull` (`prefix` empty) or an array filter (`prefix` = "i.").
fn manager_condition(filter: &ManagerFilter, prefix: &str) -> Document {
    let emails: Vec<String> = filter.emails.iter().map(|e| e.to_lowercase()).collect();
    let mut cond = Document::new();
    cond.insert(format!("{}email", prefix), doc! { "$in": emails });
    if let Some(role) = filter.role {
        cond.insert(format!("{}role", prefix), role.as_str());
    }
    if let Some(corp) = &filter.corporation_id {
        cond.insert(format!("{}corporation_id", prefix), corp.as_str());
    }
    cond
}

/// Record filter that only matches while it holds an element selected by `filter`.
fn manager_element_filter(key: &OrgKey, filter: &ManagerFilter) -> Document {
    let mut selector = key_filter(key);
    selector.insert("managers", doc! { "$elemMatch": manager_condition(filter, "") });
    selector
}

/// Record filter for an all-or-nothing append: no candidate email may exist yet and
/// at most `guard.max_existing` managers of the guarded role and corporation may.
fn append_filter(key: &OrgKey, managers: &[Manager], guard: &AppendGuard) -> Document {
    let emails: Vec<String> = managers.iter().map(|m| m.email.to_lowercase()).collect();
    let max_existing = i64::try_from(guard.max_existing).unwrap_or(i64::MAX);

    let mut filter = key_filter(key);
    filter.insert("managers.email", doc! { "$nin": emails });
    filter.insert(
        "$expr",
        doc! {
            "$lte": [
                { "$size": { "$filter": {
                    "input": { "$ifNull": ["$managers", []] },
                    "as": "m",
                    "cond": { "$and": [
                        { "$eq": ["$$m.role", guard.role.as_str()] },
                        { "$eq": ["$$m.corporation_id", guard.corporation_id.as_str()] },
                    ]},
                }}},
                max_existing,
            ]
        },
    );
    filter
}

/// Record filter that fails while any manager of the corporation remains.
fn remove_corporation_filter(key: &OrgKey, corporation_id: &str) -> Document {
    let mut filter = key_filter(key);
    filter.insert("managers.corporation_id", doc! { "$ne": corporation_id });
    filter
}

/// Update pipeline for a wrong guess: bump the counter, then consume at the limit.
fn failed_attempt_update(max_attempts: u32) -> Vec<Document> {
    vec![
        doc! { "$set": { "failed_attempts": { "$add": [{ "$ifNull": ["$failed_attempts", 0] }, 1] } } },
        doc! { "$set": { "consumed": { "$gte": ["$failed_attempts", i64::from(max_attempts)] } } },
    ]
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl SigningStore for ClaDb {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.run("ping", self.db.run_command(doc! { "ping": 1 }, None))
            .await
            .map(|_| ())
    }

    async fn find_record(&self, key: &OrgKey) -> Result<Option<SigningRecord>, ServiceError> {
        self.run("find_record", self.signings().find_one(key_filter(key), None))
            .await
    }

    async fn upsert_record(
        &self,
        key: &OrgKey,
        record: &SigningRecord,
    ) -> Result<Option<String>, ServiceError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        let result = self
            .run(
                "upsert_record",
                self.signings().replace_one(key_filter(key), record, options),
            )
            .await?;

        Ok(result.upserted_id.map(|id| match id {
            Bson::ObjectId(oid) => oid.to_hex(),
            other => other.to_string(),
        }))
    }

    async fn delete_record(&self, key: &OrgKey) -> Result<bool, ServiceError> {
        let result = self
            .run("delete_record", self.signings().delete_one(key_filter(key), None))
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn append_managers(
        &self,
        key: &OrgKey,
        managers: &[Manager],
        guard: &AppendGuard,
    ) -> Result<WriteOutcome, ServiceError> {
        let docs = managers
            .iter()
            .map(to_bson)
            .collect::<Result<Vec<Bson>, _>>()?;

        let result = self
            .run(
                "append_managers",
                self.signings().update_one(
                    append_filter(key, managers, guard),
                    doc! { "$push": { "managers": { "$each": docs } } },
                    None,
                ),
            )
            .await?;

        self.guarded_outcome(key, result.matched_count).await
    }

    async fn remove_managers(&self, key: &OrgKey, filter: &ManagerFilter) -> Result<(), ServiceError> {
        let result = self
            .run(
                "remove_managers",
                self.signings().update_one(
                    key_filter(key),
                    doc! { "$pull": { "managers": manager_condition(filter, "") } },
                    None,
                ),
            )
            .await?;

        if result.matched_count == 0 {
            return Err(ServiceError::NoDbRecord);
        }
        Ok(())
    }

    async fn update_manager(
        &self,
        key: &OrgKey,
        filter: &ManagerFilter,
        update: &ManagerUpdate,
    ) -> Result<UpdateOutcome, ServiceError> {
        let selector = manager_element_filter(key, filter);
        if update.is_empty() {
            let count = self
                .run(
                    "count_manager",
                    self.signings().count_documents(selector, None),
                )
                .await?;
            if count == 0 {
                return self.unmatched_outcome(key).await;
            }
            return Ok(UpdateOutcome {
                matched_count: 1,
                modified_count: 0,
            });
        }

        let mut set = Document::new();
        if let Some(hash) = &update.password_hash {
            set.insert("managers.$[i].password_hash", hash.as_str());
        }
        if let Some(changed) = update.initial_password_changed {
            set.insert("managers.$[i].initial_password_changed", changed);
        }
        if let Some(login) = &update.login {
            set.insert("managers.$[i].login", to_bson(login)?);
        }

        let options = UpdateOptions::builder()
            .array_filters(vec![manager_condition(filter, "i.")])
            .build();

        let result = self
            .run(
                "update_manager",
                self.signings()
                    .update_one(selector, doc! { "$set": set }, options),
            )
            .await?;

        if result.matched_count == 0 {
            return self.unmatched_outcome(key).await;
        }
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn append_corporation(
        &self,
        key: &OrgKey,
        corporation: &CorpSigning,
    ) -> Result<WriteOutcome, ServiceError> {
        let mut filter = key_filter(key);
        let corporation_doc = to_bson(corporation)?;
        filter.insert(
            "corporations.corporation_id",
            doc! { "$ne": corporation.corporation_id.as_str() },
        );

        let result = self
            .run(
                "append_corporation",
                self.signings().update_one(
                    filter,
                    doc! { "$push": { "corporations": corporation_doc } },
                    None,
                ),
            )
            .await?;

        self.guarded_outcome(key, result.matched_count).await
    }

    async fn add_corporation_domain(
        &self,
        key: &OrgKey,
        corporation_id: &str,
        domain: &str,
    ) -> Result<UpdateOutcome, ServiceError> {
        let options = UpdateOptions::builder()
            .array_filters(vec![doc! { "c.corporation_id": corporation_id }])
            .build();
        let mut filter = key_filter(key);
        filter.insert("corporations.corporation_id", corporation_id);

        let result = self
            .run(
                "add_corporation_domain",
                self.signings().update_one(
                    filter,
                    doc! { "$addToSet": { "corporations.$[c].email_domains": domain } },
                    options,
                ),
            )
            .await?;

        if result.matched_count == 0 {
            return self.unmatched_outcome(key).await;
        }
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn remove_corporation(
        &self,
        key: &OrgKey,
        corporation_id: &str,
    ) -> Result<WriteOutcome, ServiceError> {
        let result = self
            .run(
                "remove_corporation",
                self.signings().update_one(
                    remove_corporation_filter(key, corporation_id),
                    doc! { "$pull": { "corporations": { "corporation_id": corporation_id } } },
                    None,
                ),
            )
            .await?;

        self.guarded_outcome(key, result.matched_count).await
    }
}

#[async_trait]
impl CodeStore for ClaDb {
    async fn insert_code(
        &self,
        code: &VerificationCode,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, ServiceError> {
        // Clear a dead code for the key; a live one stays and trips the unique _id.
        self.run(
            "clear_dead_code",
            self.codes().delete_one(
                doc! {
                    "_id": code.id.as_str(),
                    "$or": [
                        { "consumed": true },
                        { "expiry_utc": { "$lte": BsonDateTime::from_chrono(now) } },
                    ],
                },
                None,
            ),
        )
        .await?;

        match self
            .timed("insert_code", self.codes().insert_one(code, None))
            .await?
        {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(e) if is_duplicate_key(&e) => {
                tracing::debug!(key = %code.id, "Live verification code already exists");
                Ok(WriteOutcome::Rejected)
            }
            Err(e) => {
                tracing::error!(operation = "insert_code", error = %e, "Store operation failed");
                Err(ServiceError::Database(e))
            }
        }
    }

    async fn find_code(&self, id: &str) -> Result<Option<VerificationCode>, ServiceError> {
        self.run("find_code", self.codes().find_one(doc! { "_id": id }, None))
            .await
    }

    async fn mark_consumed(&self, id: &str, code_hash: &str) -> Result<bool, ServiceError> {
        let result = self
            .run(
                "mark_consumed",
                self.codes().update_one(
                    doc! { "_id": id, "consumed": false, "code_hash": code_hash },
                    doc! { "$set": { "consumed": true } },
                    None,
                ),
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn record_failed_attempt(
        &self,
        id: &str,
        code_hash: &str,
        max_attempts: u32,
    ) -> Result<bool, ServiceError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .run(
                "record_failed_attempt",
                self.codes().find_one_and_update(
                    doc! { "_id": id, "consumed": false, "code_hash": code_hash },
                    failed_attempt_update(max_attempts),
                    options,
                ),
            )
            .await?;

        // No match means another caller consumed or exhausted it first.
        Ok(updated.map_or(true, |code| code.consumed))
    }
}
