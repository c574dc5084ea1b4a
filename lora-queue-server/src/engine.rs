use anyhow::{Context, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use lora_queue_core::{GenerationRequest, ModelLike, Processed};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    width: Option<usize>,
    height: Option<usize>,
    steps: Option<usize>,
    guidance: Option<f64>,
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct ImageResponse {
    image: String,
}

/// Generates through a remote `/v1/images/generations` endpoint that
/// returns one base64 PNG per call.
pub struct RemoteEngine {
    agent: ureq::Agent,
    url: String,
}

impl RemoteEngine {
    pub fn new(base_url: &str) -> Self {
        Self {
            agent: ureq::Agent::new(),
            url: format!("{}/v1/images/generations", base_url.trim_end_matches('/')),
        }
    }

    fn generate_one(&self, request: &GenerationRequest, seed: Option<u64>) -> Result<image::DynamicImage> {
        let payload = ImageRequest {
            prompt: &request.prompt,
            width: request.width,
            height: request.height,
            steps: request.steps,
            guidance: request.guidance,
            seed,
        };

        let response: ImageResponse = self
            .agent
            .post(&self.url)
            .send_json(&payload)
            .with_context(|| format!("request to {} failed", self.url))?
            .into_json()
            .context("engine returned malformed JSON")?;

        let bytes = BASE64_STANDARD
            .decode(response.image.as_bytes())
            .context("engine returned invalid base64")?;
        image::load_from_memory(&bytes).context("engine returned an unreadable image")
    }
}

impl ModelLike for RemoteEngine {
    fn run(&mut self, request: &GenerationRequest) -> Result<Processed> {
        let mut processed = Processed::default();

        for index in 0..request.image_count() {
            let seed = request.seed.map(|seed| seed.wrapping_add(index as u64));
            debug!("Generating image {} with seed {:?}", index, seed);

            processed.images.push(self.generate_one(request, seed)?);
            processed.prompts.push(request.prompt.clone());
            processed.infotexts.push(infotext(request, seed));
        }

        Ok(processed)
    }
}

/// Parameter summary stored alongside each image.
pub fn infotext(request: &GenerationRequest, seed: Option<u64>) -> String {
    let mut text = request.prompt.clone();
    if !request.negative_prompt.is_empty() {
        text.push_str(&format!("\nNegative prompt: {}", request.negative_prompt));
    }

    let mut params = Vec::new();
    if let Some(steps) = request.steps {
        params.push(format!("Steps: {}", steps));
    }
    if let Some(seed) = seed {
        params.push(format!("Seed: {}", seed));
    }
    if let (Some(width), Some(height)) = (request.width, request.height) {
        params.push(format!("Size: {}x{}", width, height));
    }
    if let Some(guidance) = request.guidance {
        params.push(format!("Guidance: {}", guidance));
    }
    if !params.is_empty() {
        text.push('\n');
        text.push_str(&params.join(", "));
    }

    text
}
