use crate::domain::error::DomainError;
use crate::domain::query::Selection;
use crate::domain::schema::Collection;
use crate::presentation::dto::{
    CountResponse, FiltersRequest, InsertRequest, RowsResponse, UpdateRequest,
};
use crate::presentation::handlers::{AppDataService, request_id};
use crate::presentation::utils::OptionalUser;
use actix_web::{HttpRequest, HttpResponse, Scope, web};
use tracing::info;

pub fn scope() -> Scope {
    web::scope("/rest")
        .route("/{collection}/select", web::post().to(select))
        .route("/{collection}/count", web::post().to(count))
        .service(
            web::resource("/{collection}")
                .route(web::post().to(insert))
                .route(web::patch().to(update))
                .route(web::delete().to(delete)),
        )
}

async fn select(
    user: OptionalUser,
    data: web::Data<AppDataService>,
    path: web::Path<String>,
    payload: web::Json<Selection>,
) -> Result<HttpResponse, DomainError> {
    let collection: Collection = path.parse()?;
    let rows = data.select(collection, &payload, user.0).await?;
    Ok(HttpResponse::Ok().json(RowsResponse { rows }))
}

async fn count(
    user: OptionalUser,
    data: web::Data<AppDataService>,
    path: web::Path<String>,
    payload: web::Json<FiltersRequest>,
) -> Result<HttpResponse, DomainError> {
    let collection: Collection = path.parse()?;
    let count = data.count(collection, &payload.filters, user.0).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

async fn insert(
    req: HttpRequest,
    user: OptionalUser,
    data: web::Data<AppDataService>,
    path: web::Path<String>,
    payload: web::Json<InsertRequest>,
) -> Result<HttpResponse, DomainError> {
    let collection: Collection = path.parse()?;
    let rows = data
        .insert(collection, payload.into_inner().records, user.0)
        .await?;

    info!(request_id = %request_id(&req), %collection, rows = rows.len(), "rows created");

    Ok(HttpResponse::Created().json(RowsResponse { rows }))
}

async fn update(
    req: HttpRequest,
    user: OptionalUser,
    data: web::Data<AppDataService>,
    path: web::Path<String>,
    payload: web::Json<UpdateRequest>,
) -> Result<HttpResponse, DomainError> {
    let collection: Collection = path.parse()?;
    let UpdateRequest { patch, filters } = payload.into_inner();
    let rows = data.update(collection, patch, filters, user.0).await?;

    info!(request_id = %request_id(&req), %collection, rows = rows.len(), "rows updated");

    Ok(HttpResponse::Ok().json(RowsResponse { rows }))
}

async fn delete(
    req: HttpRequest,
    user: OptionalUser,
    data: web::Data<AppDataService>,
    path: web::Path<String>,
    payload: web::Json<FiltersRequest>,
) -> Result<HttpResponse, DomainError> {
    let collection: Collection = path.parse()?;
    let rows = data
        .delete(collection, payload.into_inner().filters, user.0)
        .await?;

    info!(request_id = %request_id(&req), %collection, rows = rows.len(), "rows deleted");

    Ok(HttpResponse::Ok().json(RowsResponse { rows }))
}
