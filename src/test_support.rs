//! Fixtures shared by unit tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb};

use crate::classifier::InferenceBackend;
use crate::error::InferenceError;

/// A gradient image of the given size, encoded in `format`.
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// Backend that replays scripted answers and counts calls. Once the script
/// runs out it keeps failing.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, InferenceError>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, InferenceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answering(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn transient() -> Result<String, InferenceError> {
    Err(InferenceError::Status {
        status: 503,
        body: "try later".into(),
    })
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(transient)
    }
}
