use thiserror::Error;

use crate::api::DispenseRequest;
use crate::model::Colour;

/// Largest volume a single dispense command may request.
pub const MAX_VOLUME_ML: f64 = 50.0;

/// Longest accepted camera id.
pub const MAX_CAMERA_ID_LEN: usize = 64;

/// Why a request was rejected before any work was done.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// `colour` is not one of the known bottles.
    #[error("colour must be one of red, green, blue (got {0:?})")]
    Colour(String),
    /// `volume_ml` is outside `(0, 50]` or not a number.
    #[error("volume_ml must be in (0, {MAX_VOLUME_ML}] (got {0})")]
    Volume(f64),
    /// Camera id is not a single, plain path segment.
    #[error("invalid camera id {0:?}")]
    Camera(String),
    /// The body could not be decoded at all.
    #[error("invalid request body: {0}")]
    Body(String),
}

/// A dispense request whose fields passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDispense {
    pub mix_id: i64,
    pub run_id: i64,
    pub colour: Colour,
    pub volume_ml: f64,
}

impl ValidDispense {
    /// Natural-language instruction handed to the inference endpoint.
    ///
    /// Whole volumes keep their decimal point (`10.0`), as the inference
    /// prompts were written that way.
    pub fn instruction(&self) -> String {
        format!(
            "Dispense {:?} ml from the {} bottle",
            self.volume_ml, self.colour
        )
    }
}

/// Validates a dispense request against its declared ranges.
pub fn validate_dispense(req: &DispenseRequest) -> Result<ValidDispense, ValidationError> {
    let colour = req
        .colour
        .parse::<Colour>()
        .map_err(ValidationError::Colour)?;

    // Written so NaN fails too.
    if !(req.volume_ml > 0.0 && req.volume_ml <= MAX_VOLUME_ML) {
        return Err(ValidationError::Volume(req.volume_ml));
    }

    Ok(ValidDispense {
        mix_id: req.mix_id,
        run_id: req.run_id,
        colour,
        volume_ml: req.volume_ml,
    })
}

/// Checks that a camera id is one plain path segment: ASCII letters,
/// digits, `_`, `-` or `.`, and not `.` or `..`.
pub fn validate_camera_id(cam_id: &str) -> Result<(), ValidationError> {
    let plain = cam_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if cam_id.is_empty()
        || cam_id.len() > MAX_CAMERA_ID_LEN
        || !plain
        || cam_id == "."
        || cam_id == ".."
    {
        return Err(ValidationError::Camera(cam_id.to_string()));
    }
    Ok(())
}
