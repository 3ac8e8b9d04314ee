use ndarray::ArrayView1;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SimilarityError {
    #[error("Feature dimensions differ: {0} vs {1}")]
    DimensionMismatch(usize, usize),
    #[error("Feature vector is empty or all zeros")]
    ZeroVector,
}

/// Cosine similarity of two feature vectors, clamped to [-1, 1].
///
/// Unit-normalized inputs make this a plain dot product; normalizing here as
/// well keeps the range guarantee when a collaborator is sloppy.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch(a.len(), b.len()));
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if !norm.is_normal() {
        return Err(SimilarityError::ZeroVector);
    }
    Ok((a.dot(&b) / norm).clamp(-1.0, 1.0))
}

/// Scores are reported with three decimals.
pub fn round_score(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

/// Scales a vector to unit length in place.
pub fn l2_normalize(features: &mut [f32]) -> Result<(), SimilarityError> {
    let norm = ArrayView1::from(&*features).dot(&ArrayView1::from(&*features)).sqrt();
    if !norm.is_normal() {
        return Err(SimilarityError::ZeroVector);
    }
    features.iter_mut().for_each(|v| *v /= norm);
    Ok(())
}
