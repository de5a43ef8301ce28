pub mod executor;
pub mod extract;
pub mod output;
pub mod plan;

use std::path::{Path, PathBuf};

use serde_json::json;

use nanogen_contracts::error::{GenerateError, Result};
use nanogen_contracts::events::{self, EventPayload, EventWriter};
use nanogen_contracts::{Credential, GenerationRequest};

pub use executor::{
    is_ambiguous_auth_or_route_failure, HttpTransport, ProgressSink, RequestExecutor, Transport,
    TransportError, TransportResponse, REQUEST_TIMEOUT,
};
pub use extract::{extract_image, GeneratedImage};
pub use output::{output_path_for, write_image};
pub use plan::{build_attempts, AttemptSpec, AuthScheme, MODEL_ID};

/// Prompt in, decoded image out: plan, execute, extract.
pub struct ImageGenerator<T: Transport = HttpTransport> {
    executor: RequestExecutor<T>,
    events: Option<EventWriter>,
}

impl ImageGenerator<HttpTransport> {
    pub fn new() -> Self {
        Self::with_transport(HttpTransport::new())
    }
}

impl Default for ImageGenerator<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ImageGenerator<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            executor: RequestExecutor::new(transport),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.executor = self.executor.with_events(events.clone());
        self.events = events;
        self
    }

    /// See [`RequestExecutor::with_progress`].
    pub fn with_progress(mut self, sink: impl Fn(&str) + 'static) -> Self {
        self.executor = self.executor.with_progress(sink);
        self
    }

    pub fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
        warnings: &mut Vec<String>,
    ) -> Result<GeneratedImage> {
        self.emit(
            events::GENERATION_STARTED,
            events::payload([
                ("model", json!(MODEL_ID)),
                ("api_base", json!(credential.api_base)),
                ("aspect_ratio", json!(request.aspect_ratio.as_str())),
                ("image_size", json!(request.image_size.as_str())),
            ]),
            warnings,
        );

        let result = self.run(credential, request, warnings);
        if let Err(err) = &result {
            self.emit(
                events::GENERATION_FAILED,
                events::payload([
                    ("kind", json!(err.kind())),
                    ("error", json!(err.to_string())),
                ]),
                warnings,
            );
        }
        result
    }

    fn run(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
        warnings: &mut Vec<String>,
    ) -> Result<GeneratedImage> {
        let attempts = build_attempts(&credential.api_key, &credential.api_base)?;
        let payload = request.payload_value().map_err(|err| {
            GenerateError::Configuration(format!("request payload encoding failed: {err}"))
        })?;
        let response = self.executor.execute(&payload, &attempts, warnings)?;
        extract_image(&response, warnings)
    }

    /// Writes `image` under `requested` with the sniffed extension.
    pub fn save(
        &self,
        image: &GeneratedImage,
        requested: &Path,
        warnings: &mut Vec<String>,
    ) -> anyhow::Result<PathBuf> {
        let path = write_image(requested, image.format, &image.bytes)?;
        self.emit(
            events::IMAGE_SAVED,
            events::payload([
                ("path", json!(path.display().to_string())),
                ("mime_type", json!(image.format.mime_type)),
                ("reported_mime_type", json!(image.reported_mime_type)),
                ("bytes", json!(image.bytes.len())),
            ]),
            warnings,
        );
        Ok(path)
    }

    fn emit(&self, event_type: &str, payload: EventPayload, warnings: &mut Vec<String>) {
        let Some(writer) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = writer.emit(event_type, payload) {
            executor::push_unique_warning(
                warnings,
                format!("event log write failed ({}): {err:#}", writer.path().display()),
            );
        }
    }
}
