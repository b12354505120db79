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

use nodewarden_types::ServerBackup;

use super::NodeServer;
use crate::error::ApiError;
use crate::extract::ApiKey;

async fn get_server(
    _auth: ApiKey,
    service: web::Data<NodeServer>,
) -> Result<HttpResponse, ApiError> {
    let status = service.status().await?;
    Ok(HttpResponse::Ok().json(status))
}

async fn get_server_load(
    _auth: ApiKey,
    service: web::Data<NodeServer>,
) -> Result<HttpResponse, ApiError> {
    let load = service.load().await?;
    Ok(HttpResponse::Ok().json(load))
}

async fn export_backup(
    _auth: ApiKey,
    service: web::Data<NodeServer>,
) -> Result<HttpResponse, ApiError> {
    let payload = service.export_backup().await?;
    Ok(HttpResponse::Ok().json(payload))
}

async fn import_backup(
    _auth: ApiKey,
    service: web::Data<NodeServer>,
    body: web::Json<ServerBackup>,
) -> Result<HttpResponse, ApiError> {
    service.import_backup(&body).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn reboot_server(
    _auth: ApiKey,
    service: web::Data<NodeServer>,
) -> Result<HttpResponse, ApiError> {
    service.reboot().await;
    Ok(HttpResponse::Accepted().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/server").route(web::get().to(get_server)))
        .service(web::resource("/api/server/load").route(web::get().to(get_server_load)))
        .service(
            web::resource("/api/server/backup")
                .route(web::get().to(export_backup))
                .route(web::post().to(import_backup)),
        )
        .service(web::resource("/api/server/reboot").route(web::post().to(reboot_server)));
}
