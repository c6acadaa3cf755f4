//! Mock query-vector generation
//!
//! `ORDER BY SIMILARITY TO "text"` needs a query vector but the engine has
//! no embedding model; it derives a deterministic pseudo-vector from the text
//! via SplitMix64. Deployments with a real model supply their own vectors
//! through [`crate::SimilarityTarget::Vector`] instead.

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Derive a deterministic, unit-norm query vector from text
pub fn mock_query_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut seed = 0xcbf29ce484222325u64;
    for byte in text.bytes() {
        seed = splitmix64(seed ^ u64::from(byte));
    }

    let mut vector = Vec::with_capacity(dimension);
    let mut state = seed;
    for _ in 0..dimension {
        state = splitmix64(state);
        // Uniform in [-1, 1)
        let unit = (state as f64) / (u64::MAX as f64);
        vector.push((unit * 2.0 - 1.0) as f32);
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    } else if let Some(first) = vector.first_mut() {
        *first = 1.0;
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_text() {
        assert_eq!(mock_query_vector("hello", 8), mock_query_vector("hello", 8));
        assert_ne!(mock_query_vector("hello", 8), mock_query_vector("world", 8));
    }

    #[test]
    fn has_requested_dimension_and_unit_norm() {
        let v = mock_query_vector("query text", 16);
        assert_eq!(v.len(), 16);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
