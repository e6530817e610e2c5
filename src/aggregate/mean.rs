//! Running-mean arithmetic.
//!
//! A mean over `w` items folded with the mean of `k` new items is
//! `prior * w/(w+k) + batch * k/(w+k)`, which equals the mean over all
//! `w + k` items. Sums are taken in f64.

/// Component-wise mean of `vectors`. `None` for an empty batch.
pub fn batch_mean(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut sum = vec![0.0f64; first.len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += *x as f64;
        }
    }
    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

/// Fold a batch mean over `k` items into a prior mean over `weight` items.
pub fn fold_mean(prior: Option<(&[f32], u64)>, batch: &[f32], k: u64) -> Vec<f32> {
    match prior {
        Some((prior, weight)) if weight > 0 && prior.len() == batch.len() => {
            let total = (weight + k) as f64;
            let pw = weight as f64 / total;
            let bw = k as f64 / total;
            prior
                .iter()
                .zip(batch)
                .map(|(p, b)| (*p as f64 * pw + *b as f64 * bw) as f32)
                .collect()
        }
        _ => batch.to_vec(),
    }
}

/// Scalar version of [`fold_mean`].
pub fn fold_scalar(prior: Option<(f64, u64)>, batch: f64, k: u64) -> f64 {
    match prior {
        Some((prior, weight)) if weight > 0 => {
            let total = (weight + k) as f64;
            prior * (weight as f64 / total) + batch * (k as f64 / total)
        }
        _ => batch,
    }
}
