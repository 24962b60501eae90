//! src/services/document_store.rs
//!
//! DocumentStore: lazily created collections, document writes and the
//! atomic sequence counter, on top of a MongoDB client.

use crate::credentials::MongoCredentials;
use bson::{Bson, Document, doc, oid::ObjectId};
use mongodb::{
    Client, Collection, Database,
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, ReturnDocument, Tls, TlsOptions},
};
use thiserror::Error;
use tracing::{debug, error, info};

/// Database used when none is configured.
pub const DEFAULT_DATABASE: &str = "data_facade";
/// Collection holding the counter document.
pub const SEQUENCE_COLLECTION: &str = "sequences";
/// `_id` of the counter document.
pub const SEQUENCE_ID: &str = "unique_ids";

/// Server code for "collection already exists".
const NAMESPACE_EXISTS: i32 = 48;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("write to `{collection}` failed: {message}")]
    Write { collection: String, message: String },
    #[error("read from `{collection}` failed: {message}")]
    Read { collection: String, message: String },
    #[error("sequence counter is unusable: {0}")]
    InvalidSequence(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

fn is_connection_error(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
    )
}

fn is_namespace_exists(err: &MongoError) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(cmd) if cmd.code == NAMESPACE_EXISTS)
}

fn write_error(collection: &str, err: MongoError) -> DocumentError {
    if is_connection_error(&err) {
        DocumentError::Connection(err.to_string())
    } else {
        DocumentError::Write {
            collection: collection.to_string(),
            message: err.to_string(),
        }
    }
}

fn read_error(collection: &str, err: MongoError) -> DocumentError {
    if is_connection_error(&err) {
        DocumentError::Connection(err.to_string())
    } else {
        DocumentError::Read {
            collection: collection.to_string(),
            message: err.to_string(),
        }
    }
}

/// Interpret a caller-supplied id: a 24-hex string is an ObjectId, an
/// integer string is an Int64, anything else stays a string.
pub fn parse_document_id(raw: &str) -> Bson {
    if let Ok(oid) = ObjectId::parse_str(raw) {
        return Bson::ObjectId(oid);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Bson::Int64(n);
    }
    Bson::String(raw.to_string())
}

/// Extract the integer `value` field from the counter document.
pub fn sequence_value(document: &Document) -> DocumentResult<i64> {
    match document.get("value") {
        Some(Bson::Int32(v)) => Ok(i64::from(*v)),
        Some(Bson::Int64(v)) => Ok(*v),
        Some(Bson::Double(v)) if v.fract() == 0.0 => Ok(*v as i64),
        Some(other) => Err(DocumentError::InvalidSequence(format!(
            "`value` is {:?}",
            other.element_type()
        ))),
        None => Err(DocumentError::InvalidSequence("`value` is missing".into())),
    }
}

/// DocumentStore owns one MongoDB client bound to one database.
///
/// The client is internally pooled and cheap to clone.
#[derive(Clone)]
pub struct DocumentStore {
    client: Client,
    db: Database,
}

impl DocumentStore {
    /// Connect with the bound URI, verifying TLS against the bound CA file
    /// when one is present, and ping the database.
    pub async fn connect(creds: &MongoCredentials, database: &str) -> DocumentResult<Self> {
        let mut options = ClientOptions::parse(&creds.uri)
            .await
            .map_err(|err| DocumentError::Connection(err.to_string()))?;
        if let Some(ca) = &creds.ca_cert_path {
            options.tls = Some(Tls::Enabled(
                TlsOptions::builder().ca_file_path(ca.clone()).build(),
            ));
        }

        let client = Client::with_options(options)
            .map_err(|err| DocumentError::Connection(err.to_string()))?;
        let store = Self::from_client(client, database);
        store.ping().await?;
        info!(database, "connected document store");
        Ok(store)
    }

    pub fn from_client(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    pub async fn ping(&self) -> DocumentResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|err| DocumentError::Connection(err.to_string()))?;
        Ok(())
    }

    /// Shut the client down, waiting for in-flight operations.
    pub async fn close(&self) {
        self.client.clone().shutdown().await;
        info!("document store closed");
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn collection_exists(&self, name: &str) -> DocumentResult<bool> {
        let names = self
            .db
            .list_collection_names()
            .await
            .map_err(|err| read_error(name, err))?;
        Ok(names.iter().any(|n| n == name))
    }

    /// Create `name` unless it already exists. Losing a creation race to a
    /// concurrent caller counts as success.
    pub async fn ensure_collection(&self, name: &str) -> DocumentResult<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }
        match self.db.create_collection(name).await {
            Ok(()) => {
                info!(collection = name, "collection created");
                Ok(())
            }
            Err(err) if is_namespace_exists(&err) => {
                debug!(collection = name, "collection created concurrently");
                Ok(())
            }
            Err(err) => {
                error!(collection = name, "create collection failed: {}", err);
                Err(write_error(name, err))
            }
        }
    }

    /// Write `document` into `collection`, creating the collection first if
    /// needed.
    ///
    /// A document carrying `_id` replaces the stored document with that id
    /// (inserting it when absent), so retries do not duplicate it. A document
    /// without `_id` is inserted and gets a server-generated ObjectId.
    /// Returns the document's id.
    pub async fn upsert_document(
        &self,
        collection: &str,
        document: Document,
    ) -> DocumentResult<Bson> {
        self.ensure_collection(collection).await?;
        let coll = self.collection(collection);

        match document.get("_id").cloned() {
            Some(id) => {
                coll.replace_one(doc! { "_id": id.clone() }, document)
                    .upsert(true)
                    .await
                    .map_err(|err| {
                        error!(collection, "replace failed: {}", err);
                        write_error(collection, err)
                    })?;
                debug!(collection, %id, "document replaced");
                Ok(id)
            }
            None => {
                let inserted = coll.insert_one(document).await.map_err(|err| {
                    error!(collection, "insert failed: {}", err);
                    write_error(collection, err)
                })?;
                debug!(collection, id = %inserted.inserted_id, "document inserted");
                Ok(inserted.inserted_id)
            }
        }
    }

    /// Atomically increment and return the counter, creating it at 1.
    ///
    /// One `findAndModify` with upsert; the server serializes concurrent
    /// callers so no two of them observe the same value.
    pub async fn next_sequence_value(&self) -> DocumentResult<i64> {
        let updated = self
            .collection(SEQUENCE_COLLECTION)
            .find_one_and_update(
                doc! { "_id": SEQUENCE_ID },
                doc! { "$inc": { "value": 1_i64 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|err| {
                error!("sequence increment failed: {}", err);
                write_error(SEQUENCE_COLLECTION, err)
            })?;

        let document = updated.ok_or_else(|| {
            DocumentError::InvalidSequence("increment returned no document".into())
        })?;
        sequence_value(&document)
    }

    /// Point lookup by id. A missing document (or collection) is `Ok(None)`.
    pub async fn fetch_document(
        &self,
        collection: &str,
        id: Bson,
    ) -> DocumentResult<Option<Document>> {
        self.collection(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(|err| {
                error!(collection, "lookup failed: {}", err);
                read_error(collection, err)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_by_shape() {
        let oid = ObjectId::new();
        assert_eq!(parse_document_id(&oid.to_hex()), Bson::ObjectId(oid));
        assert_eq!(parse_document_id("42"), Bson::Int64(42));
        assert_eq!(parse_document_id("cust-7"), Bson::String("cust-7".into()));
    }

    #[test]
    fn counter_value_accepts_integer_encodings() {
        assert_eq!(sequence_value(&doc! { "value": 3_i32 }).expect("int32"), 3);
        assert_eq!(sequence_value(&doc! { "value": 4_i64 }).expect("int64"), 4);
        assert_eq!(sequence_value(&doc! { "value": 5.0 }).expect("double"), 5);
    }

    #[test]
    fn counter_value_rejects_other_shapes() {
        assert!(matches!(
            sequence_value(&doc! { "value": "seven" }),
            Err(DocumentError::InvalidSequence(_))
        ));
        assert!(matches!(
            sequence_value(&doc! { "_id": SEQUENCE_ID }),
            Err(DocumentError::InvalidSequence(_))
        ));
        assert!(sequence_value(&doc! { "value": 1.5 }).is_err());
    }
}
