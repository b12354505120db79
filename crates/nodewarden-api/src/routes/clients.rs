// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use actix_web::{HttpResponse, web};
use serde::Deserialize;

use nodewarden_types::Protocol;

use super::NodeManager;
use crate::error::ApiError;
use crate::extract::ApiKey;

// WireGuard client ids are standard base64 and may contain `/`, so ids
// travel in request bodies and query strings rather than path segments.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateClientRequest {
    client_name: String,
    protocol: Protocol,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteClientRequest {
    client_id: String,
    protocol: Protocol,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateClientRequest {
    client_id: String,
    protocol: Protocol,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfigQuery {
    client_id: String,
    protocol: Protocol,
}

async fn list_clients(
    _auth: ApiKey,
    manager: web::Data<NodeManager>,
) -> Result<HttpResponse, ApiError> {
    let users = manager.get_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

async fn create_client(
    _auth: ApiKey,
    manager: web::Data<NodeManager>,
    body: web::Json<CreateClientRequest>,
) -> Result<HttpResponse, ApiError> {
    let client_name = body.client_name.trim();
    if client_name.is_empty() {
        return Err(ApiError::BadRequest("clientName must not be empty".into()));
    }

    let result = manager
        .create_client(client_name, body.protocol, body.expires_at)
        .await?;
    Ok(HttpResponse::Created().json(result))
}

async fn update_client(
    _auth: ApiKey,
    manager: web::Data<NodeManager>,
    body: web::Json<UpdateClientRequest>,
) -> Result<HttpResponse, ApiError> {
    let updated = manager
        .update_expires_at(&body.client_id, body.protocol, body.expires_at)
        .await?;
    if !updated {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn delete_client(
    _auth: ApiKey,
    manager: web::Data<NodeManager>,
    body: web::Json<DeleteClientRequest>,
) -> Result<HttpResponse, ApiError> {
    let deleted = manager
        .delete_client(&body.client_id, body.protocol)
        .await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn client_config(
    _auth: ApiKey,
    manager: web::Data<NodeManager>,
    query: web::Query<ClientConfigQuery>,
) -> Result<HttpResponse, ApiError> {
    match manager
        .client_config(&query.client_id, query.protocol)
        .await?
    {
        Some(config) => Ok(HttpResponse::Ok().json(serde_json::json!({ "config": config }))),
        None => Err(ApiError::NotFound),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/clients")
            .route(web::get().to(list_clients))
            .route(web::post().to(create_client))
            .route(web::patch().to(update_client))
            .route(web::delete().to(delete_client)),
    )
    .service(web::resource("/api/clients/config").route(web::get().to(client_config)));
}
