//! AMG8833 payload codec
//!
//! The sensor publishes 64 little-endian `f32` values, row-major in sensor
//! order. The sensor is mounted rotated and mirrored relative to the camera
//! lens, so the decoded grid is transposed and then flipped vertically to
//! line up with the video frame: `out[r][c] = raw[c][7 - r]`.

use crate::constants::thermal::{CELL_COUNT, GRID_SIZE, PAYLOAD_LEN};
use crate::error::DecodeError;

/// 8x8 temperature grid in camera orientation, `[row][col]`
pub type ThermalMatrix = [[f32; GRID_SIZE]; GRID_SIZE];

/// Decode a sensor payload into a matrix in camera orientation
///
/// All-or-nothing: a wrong length or any non-finite value yields an error
/// and no matrix.
pub fn decode(payload: &[u8]) -> Result<ThermalMatrix, DecodeError> {
    if payload.len() != PAYLOAD_LEN {
        return Err(DecodeError::InvalidLength {
            expected: PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let mut raw = [0.0f32; CELL_COUNT];
    for (index, chunk) in payload.chunks_exact(4).enumerate() {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(DecodeError::NonFinite { index, value });
        }
        raw[index] = value;
    }

    let mut out = [[0.0f32; GRID_SIZE]; GRID_SIZE];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = raw[c * GRID_SIZE + (GRID_SIZE - 1 - r)];
        }
    }
    Ok(out)
}

/// Build a payload from 64 values in sensor order (device simulators, tests)
pub fn encode_sensor_order(values: &[f32; CELL_COUNT]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential() -> [f32; CELL_COUNT] {
        let mut values = [0.0f32; CELL_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as f32;
        }
        values
    }

    #[test]
    fn test_orientation_matches_transpose_then_flip() {
        let values = sequential();
        let m = decode(&encode_sensor_order(&values)).unwrap();

        // Hand-computed reference: raw row-major grid
        let mut raw = [[0.0f32; 8]; 8];
        for i in 0..8 {
            for j in 0..8 {
                raw[i][j] = values[i * 8 + j];
            }
        }
        let mut transposed = [[0.0f32; 8]; 8];
        for i in 0..8 {
            for j in 0..8 {
                transposed[i][j] = raw[j][i];
            }
        }
        let mut expected = [[0.0f32; 8]; 8];
        for r in 0..8 {
            expected[r] = transposed[7 - r];
        }

        assert_eq!(m, expected);
        // Spot checks: top-left comes from raw (0,7), bottom-left from raw (0,0)
        assert_eq!(m[0][0], 7.0);
        assert_eq!(m[7][0], 0.0);
        assert_eq!(m[0][7], 63.0);
        assert_eq!(m[7][7], 56.0);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            decode(&[0u8; 255]),
            Err(DecodeError::InvalidLength { expected: 256, actual: 255 })
        );
        assert!(decode(&[]).is_err());
        assert!(decode(&[0u8; 257]).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut values = [20.0f32; CELL_COUNT];
        values[10] = f32::NAN;
        assert!(matches!(
            decode(&encode_sensor_order(&values)),
            Err(DecodeError::NonFinite { index: 10, .. })
        ));
    }
}
