//! OpenAPI documentation for the `/api/v1/*` surface, served at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{api, auth::device::DEVICE_TOKEN_HEADER, db, prompts};

/// Header-based security schemes for signed-in users and anonymous devices.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "X-Magicpixa-User",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-magicpixa-user",
                    "Email of the signed-in user, set by the authenticating proxy in front of the server.",
                ))),
            );
            components.add_security_scheme(
                "DeviceToken",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    DEVICE_TOKEN_HEADER,
                    "Signed token issued by `POST /devices` for anonymous use of the free quota.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Magicpixa API", description = "Credit-metered generative photo editing"),
    servers(
        (url = "/api/v1", description = "Magicpixa API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::features::list_features,
        api::handlers::devices::register_device,
        api::handlers::devices::get_quota,
        api::handlers::jobs::create_job,
        api::handlers::uploads::upload_photo,
        api::handlers::users::get_current_user,
        api::handlers::transactions::create_transaction,
        api::handlers::transactions::list_transactions,
        api::handlers::artifacts::list_artifacts,
        api::handlers::artifacts::get_artifact,
        api::handlers::payments::create_payment_order,
    ),
    components(
        schemas(
            prompts::Feature,
            prompts::FeatureRequest,
            prompts::Intensity,
            prompts::CaptionTone,
            prompts::OutputKind,
            api::models::jobs::JobCreate,
            api::models::jobs::JobResponse,
            api::models::jobs::FeatureInfo,
            api::models::jobs::FeatureCatalogue,
            api::models::devices::DeviceTokenResponse,
            api::models::devices::QuotaResponse,
            api::models::uploads::UploadResponse,
            api::models::users::Role,
            api::models::users::UserResponse,
            api::models::transactions::AdminTransactionType,
            api::models::transactions::CreditTransactionCreate,
            api::models::transactions::CreditTransactionResponse,
            api::models::artifacts::ArtifactResponse,
            api::models::payments::PaymentOrderCreate,
            api::models::payments::PaymentOrderResponse,
            db::models::credits::CreditTransactionType,
        )
    ),
    tags(
        (name = "devices", description = "Anonymous devices and their free quota"),
        (name = "jobs", description = "Feature catalogue and generation jobs"),
        (name = "uploads", description = "Photo uploads"),
        (name = "users", description = "The signed-in account"),
        (name = "transactions", description = "Credit ledger"),
        (name = "artifacts", description = "Generated results"),
        (name = "payments", description = "Payment gateway orders"),
    )
)]
pub struct ApiDoc;
