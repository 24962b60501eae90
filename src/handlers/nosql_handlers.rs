//! HTTP handlers for the document store.
//!
//! Documents travel as JSON objects; extended JSON (`{"$oid": ...}`) is
//! honoured on the way in and produced on the way out.

use crate::{
    errors::AppError,
    services::document_store::parse_document_id,
    state::AppState,
};
use axum::{Json, extract::State};
use bson::{Bson, Document};
use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Deserialize)]
pub struct UpdateCollectionReq {
    pub col_name: String,
    pub document: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentReq {
    pub col_name: String,
    pub id: Value,
}

fn document_id(raw: Value) -> Result<Bson, AppError> {
    match raw {
        Value::String(s) => Ok(parse_document_id(&s)),
        Value::Number(n) => n
            .as_i64()
            .map(Bson::Int64)
            .ok_or_else(|| AppError::bad_request("`id` must be an integer or a string")),
        other => Bson::try_from(other).map_err(|err| AppError::bad_request(err.to_string())),
    }
}

/// GET `/database/nosql/sequence`
pub async fn next_sequence(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let value = state.documents()?.next_sequence_value().await?;
    Ok(Json(json!({ "response": value })))
}

/// POST `/database/nosql/collection/update`
pub async fn update_collection(
    State(state): State<AppState>,
    Json(req): Json<UpdateCollectionReq>,
) -> Result<Json<Value>, AppError> {
    let document = match Bson::try_from(Value::Object(req.document)) {
        Ok(Bson::Document(document)) => document,
        Ok(_) => return Err(AppError::bad_request("`document` must be an object")),
        Err(err) => return Err(AppError::bad_request(err.to_string())),
    };
    let id = state
        .documents()?
        .upsert_document(&req.col_name, document)
        .await?;
    Ok(Json(json!({ "response": { "id": id.into_relaxed_extjson() } })))
}

/// POST `/database/nosql/collection/document`
///
/// Answers with a list holding the matching document, or an empty list when
/// neither the document nor its collection exists.
pub async fn get_document(
    State(state): State<AppState>,
    Json(req): Json<DocumentReq>,
) -> Result<Json<Value>, AppError> {
    let id = document_id(req.id)?;
    let found = state.documents()?.fetch_document(&req.col_name, id).await?;
    Ok(Json(json!({ "response": documents_json(found) })))
}

fn documents_json(found: Option<Document>) -> Vec<Value> {
    found
        .into_iter()
        .map(|d| Bson::Document(d).into_relaxed_extjson())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_strings_and_extended_json() {
        assert_eq!(document_id(json!(7)).expect("int"), Bson::Int64(7));
        assert_eq!(
            document_id(json!("cust-1")).expect("string"),
            Bson::String("cust-1".into())
        );
        let oid = bson::oid::ObjectId::new();
        assert_eq!(
            document_id(json!({ "$oid": oid.to_hex() })).expect("oid"),
            Bson::ObjectId(oid)
        );
        assert!(document_id(json!(1.5)).is_err());
    }

    #[test]
    fn absent_documents_answer_an_empty_list() {
        assert!(documents_json(None).is_empty());

        let oid = bson::oid::ObjectId::new();
        let found = documents_json(Some(bson::doc! { "_id": oid, "name": "Ada" }));
        assert_eq!(found, vec![json!({ "_id": { "$oid": oid.to_hex() }, "name": "Ada" })]);
    }
}
