//! Roster (nómina) handlers.
//!
//! - GET    /nominas?empresa=  -> list roster rows
//! - POST   /nominas           -> create a row
//! - DELETE /nominas/{id}      -> delete a row and its documents

use crate::{
    errors::AppError,
    models::nomina::{NewNomina, Nomina},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListNominasQuery {
    pub empresa: Option<String>,
}

pub async fn list_nominas(
    State(state): State<AppState>,
    Query(q): Query<ListNominasQuery>,
) -> Result<Json<Vec<Nomina>>, AppError> {
    let empresa = q.empresa.as_deref().map(str::trim).filter(|e| !e.is_empty());
    let rows = state.nominas.list_nominas(empresa).await?;
    Ok(Json(rows))
}

pub async fn create_nomina(
    State(state): State<AppState>,
    Json(body): Json<NewNomina>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.nominas.create_nomina(body).await?;
    tracing::info!(nomina_id = created.id, rut = %created.rut, "created nomina");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_nomina(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.nominas.delete_nomina(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::{
        models::document::NewDocument,
        routes::routes::routes,
        services::{document_service::DocumentRepository, export::ExportSettings},
        state::AppState,
        test_support::{memory_pool, pdf_bytes},
    };
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn setup() -> (Router, AppState) {
        let state = AppState::new(Arc::new(memory_pool().await), ExportSettings::default());
        (routes().with_state(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_owned())
            }
            None => Body::empty(),
        };
        app.clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_and_filter_by_company() {
        let (app, _) = setup().await;
        let created = send(
            &app,
            "POST",
            "/nominas",
            Some(r#"{"rut":"1-9","nombre":"Ana","empresa":"ACME"}"#),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(json(created).await["rut"], "1-9");

        send(
            &app,
            "POST",
            "/nominas",
            Some(r#"{"rut":"2-7","empresa":"Globex"}"#),
        )
        .await;

        let all = json(send(&app, "GET", "/nominas", None).await).await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        let acme = json(send(&app, "GET", "/nominas?empresa=ACME", None).await).await;
        let acme = acme.as_array().unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0]["nombre"], "Ana");
    }

    #[tokio::test]
    async fn blank_rut_is_bad_request() {
        let (app, _) = setup().await;
        let response = send(&app, "POST", "/nominas", Some(r#"{"rut":"  "}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_removes_documents_of_the_row() {
        let (app, state) = setup().await;
        let created = json(send(&app, "POST", "/nominas", Some(r#"{"rut":"1-9"}"#)).await).await;
        let id = created["id"].as_i64().unwrap();

        state
            .documents
            .create_document(NewDocument {
                rut: "1-9".into(),
                nomina_id: Some(id),
                empresa: String::new(),
                file_name: "a.pdf".into(),
                content: pdf_bytes("a"),
            })
            .await
            .unwrap();

        let uri = format!("/nominas/{id}");
        assert_eq!(
            send(&app, "DELETE", &uri, None).await.status(),
            StatusCode::NO_CONTENT
        );
        assert!(state.documents.list_documents("1-9").await.unwrap().is_empty());
        assert_eq!(
            send(&app, "DELETE", &uri, None).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
