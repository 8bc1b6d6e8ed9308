//! Product routes.
//!
//! - `GET  /api/v1/external/product/{id}` - public product lookup
//! - `POST /api/v1/internal/product`      - create a product (authenticated)

use crate::auth::Identity;
use crate::db::Connector;
use crate::error::DbError;
use crate::http::AppState;
use crate::http::crud::{CrudController, CrudRequest, Permission, SecurityRule};
use crate::http::envelope::{self, SuccessEnvelope};
use crate::http::error::{ApiError, method_not_allowed};
use crate::http::validation::{FieldError, Validate, ValidatedJson, Validator};
use crate::models::{CreateObjectResult, ExpectedReturn, ProcParam, ProcedureRequest, Row};
use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

pub const GET_PRODUCT_PROCEDURE: &str = "GetProductById";
pub const CREATE_PRODUCT_PROCEDURE: &str = "spProductCreate";

const PRODUCTS: CrudController = CrudController::new(&[SecurityRule {
    securable: "PRODUCT",
    permission: Permission::Create,
}]);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
}

impl Validate for CreateProduct {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Validator::new()
            .name("name", &self.name)
            .description("description", self.description.as_deref())
            .price("price", self.price)
            .finish()
    }
}

/// Path id of a product.
#[derive(Debug, Clone, Copy)]
struct ProductId(i64);

impl ProductId {
    fn parse(raw: &str) -> Result<Self, ApiError> {
        let id = raw.parse::<i64>().unwrap_or(0);
        Validator::new()
            .fk("id", id)
            .finish()
            .map_err(ApiError::validation)?;
        Ok(Self(id))
    }
}

pub async fn get_product<C: Connector>(
    State(state): State<AppState<C>>,
    Path(raw_id): Path<String>,
) -> Result<Json<SuccessEnvelope<Row>>, ApiError> {
    let ProductId(id) = ProductId::parse(&raw_id)?;

    let request = ProcedureRequest::new(GET_PRODUCT_PROCEDURE)
        .param("id", id)
        .expect(ExpectedReturn::Single);

    let product = state
        .gateway
        .invoke(&request)
        .await?
        .into_single()
        .ok_or_else(|| ApiError::not_found(format!("Product {} not found", id)))?;

    Ok(envelope::ok(product))
}

pub async fn create_product<C: Connector>(
    State(state): State<AppState<C>>,
    Extension(identity): Extension<Identity>,
    ValidatedJson(body): ValidatedJson<CreateProduct>,
) -> Result<(StatusCode, Json<SuccessEnvelope<CreateObjectResult>>), ApiError> {
    let CrudRequest { credential, params } = PRODUCTS.create(identity, body)?;

    let request = ProcedureRequest::new(CREATE_PRODUCT_PROCEDURE)
        .param("idAccount", credential.account_id)
        .param("idUser", credential.user_id)
        .param("name", params.name)
        .param("description", params.description)
        .param("price", price_param(params.price))
        .expect(ExpectedReturn::Single);

    let created = state
        .gateway
        .invoke(&request)
        .await?
        .single_as::<CreateObjectResult>()?
        .ok_or_else(|| {
            DbError::internal(format!("{} returned no row", CREATE_PRODUCT_PROCEDURE))
        })?;

    Ok(envelope::created(created))
}

/// Money is bound as DECIMAL with two decimal places.
fn price_param(price: f64) -> ProcParam {
    ProcParam::decimal((price * 100.0).round() as i128, 2)
}

/// Public product routes, nested under `/api/v1/external`.
pub fn external_router<C: Connector>() -> Router<AppState<C>> {
    Router::new()
        .route("/product/{id}", get(get_product::<C>))
        .method_not_allowed_fallback(method_not_allowed)
}

/// Authenticated product routes, nested under `/api/v1/internal`.
pub fn internal_router<C: Connector>() -> Router<AppState<C>> {
    Router::new()
        .route("/product", post(create_product::<C>))
        .method_not_allowed_fallback(method_not_allowed)
}
