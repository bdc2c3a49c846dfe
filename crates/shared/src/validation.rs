//! Write-payload validation for the state sync protocol.
//!
//! Payloads are inspected as raw JSON so that every malformed shape maps to
//! one of the protocol's two rejection messages instead of a generic decode
//! failure.

use serde_json::Value;

use crate::{
    domain::{PresentationState, Slide, SlideArity},
    error::ApiError,
};

pub const INVALID_STATE_FORMAT: &str = "Invalid state format";

pub fn arity_mismatch_message(arity: SlideArity) -> String {
    format!("Each slide must have exactly {arity} images")
}

pub fn parse_state_payload(body: &[u8], arity: SlideArity) -> Result<PresentationState, ApiError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::validation(INVALID_STATE_FORMAT))?;
    validate_state_value(&value, arity)
}

pub fn validate_state_value(value: &Value, arity: SlideArity) -> Result<PresentationState, ApiError> {
    let current_slide_index = value
        .get("currentSlideIndex")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::validation(INVALID_STATE_FORMAT))?;
    let raw_slides = value
        .get("slides")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::validation(INVALID_STATE_FORMAT))?;

    let mut slides = Vec::with_capacity(raw_slides.len());
    for raw_slide in raw_slides {
        let images = raw_slide
            .get("images")
            .and_then(Value::as_array)
            .filter(|images| images.len() == arity.get())
            .ok_or_else(|| ApiError::validation(arity_mismatch_message(arity)))?;
        let images = images
            .iter()
            .map(|image| image.as_str().map(str::to_owned))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ApiError::validation(INVALID_STATE_FORMAT))?;
        slides.push(Slide { images });
    }

    Ok(PresentationState {
        slides,
        current_slide_index,
    })
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
