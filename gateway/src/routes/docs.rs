//! API documentation: `/openapi.json` and a Swagger UI page at `/docs`.

use std::sync::Arc;

use axum::response::Html;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use super::predictions::IMAGE_FIELD;
use crate::AppState;

const DOCS_PAGE: &str = r##"<!DOCTYPE html>
<html>
<head>
  <title>WildLens Prediction API</title>
  <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
  </script>
</body>
</html>
"##;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/openapi.json", get(openapi))
        .route("/docs", get(docs))
}

async fn docs() -> Html<&'static str> {
    Html(DOCS_PAGE)
}

async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

fn json_response(description: &str, schema: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": format!("#/components/schemas/{}", schema) }
            }
        }
    })
}

fn prediction_operation(summary: &str) -> Value {
    json!({
        "tags": ["predictions"],
        "summary": summary,
        "security": [{ "ApiKey": [] }],
        "requestBody": {
            "required": true,
            "content": {
                "multipart/form-data": {
                    "schema": {
                        "type": "object",
                        "required": [IMAGE_FIELD],
                        "properties": {
                            IMAGE_FIELD: { "type": "string", "format": "binary" }
                        }
                    }
                },
                "application/octet-stream": {
                    "schema": { "type": "string", "format": "binary" }
                }
            }
        },
        "responses": {
            "200": json_response("Model scores, unmodified", "PredictionResponse"),
            "401": json_response("Missing or invalid API key", "ErrorDetail"),
            "422": json_response("No image in the request", "ErrorDetail"),
            "500": json_response("Prediction failed", "ErrorDetail")
        }
    })
}

pub fn openapi_document() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "WildLens Prediction API",
            "version": env!("CARGO_PKG_VERSION")
        },
        "paths": {
            "/predictions/binary": {
                "post": prediction_operation("Predicts whether an image contains a footprint using the binary classifier")
            },
            "/predictions/multiclass": {
                "post": prediction_operation("Predicts the species of a footprint image using the multiclass classifier")
            },
            "/predictions/ws": {
                "get": {
                    "tags": ["predictions"],
                    "summary": "WebSocket stream: send {filename, data(base64)} frames, receive {predictions} or {error}",
                    "security": [{ "ApiKey": [] }],
                    "responses": { "101": { "description": "Switching protocols" } }
                }
            },
            "/health": {
                "get": { "summary": "Liveness check", "responses": { "200": { "description": "Service is up" } } }
            },
            "/metrics": {
                "get": { "summary": "Prometheus metrics", "responses": { "200": { "description": "Text exposition format" } } }
            }
        },
        "components": {
            "securitySchemes": {
                "ApiKey": {
                    "type": "apiKey",
                    "in": "header",
                    "name": "Authorization",
                    "description": "Key <api key>"
                }
            },
            "schemas": {
                "PredictionResponse": {
                    "type": "object",
                    "required": ["predictions"],
                    "properties": {
                        "predictions": { "type": "array", "items": { "type": "number" } }
                    }
                },
                "ErrorDetail": {
                    "type": "object",
                    "required": ["detail"],
                    "properties": { "detail": { "type": "string" } }
                }
            }
        }
    })
}
