use utoipa::OpenApi;

use crate::{api, fonts, model, settings};

#[derive(OpenApi)]
#[openapi(
    paths(api::health, api::single_qr, api::batch_generate),
    components(schemas(
        api::HealthResponse,
        api::SingleQrRequest,
        api::BatchGenerateRequest,
        model::ParticipantRecord,
        settings::TemplateSettings,
        settings::QrPlacement,
        settings::TextPlacement,
        settings::TextStyle,
        settings::PlacementPreset,
        settings::TextAlign,
        fonts::FontFamily,
        fonts::FontWeight,
    )),
    tags((name = "qr-batch", description = "QR template compositing and batch generation"))
)]
pub struct ApiDoc;
