/*!
Raw value to temperature conversion.

The camera reports each pixel in deci-Kelvin, so the default calibration
is `raw * 0.1 - 273.15`. Both terms are configurable for sensors with a
different scale.
*/

use crate::matrix::ImageMatrix;
use serde::{Deserialize, Serialize};

/// Linear calibration: `celsius = raw * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub scale: f32,
    pub offset: f32,
}

impl Calibration {
    pub fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    /// Convert one raw value
    pub fn to_celsius(&self, raw: u16) -> f32 {
        raw as f32 * self.scale + self.offset
    }

    /// Convert a whole image
    pub fn apply(&self, raw: &ImageMatrix<u16>) -> ImageMatrix<f32> {
        raw.map(|value| self.to_celsius(value))
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale: 0.1,
            offset: -273.15,
        }
    }
}
