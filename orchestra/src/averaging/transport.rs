use rayon::prelude::*;

use crate::error::{OrchestraErr, Result};

/// How slot states travel when they are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Every state is summed on one root, divided, then pushed to all.
    Legacy,
    /// Each participant reduces its own segment of the vector in parallel,
    /// then the segments are gathered.
    PeerToPeer,
}

impl Transport {
    /// Writes the elementwise, unweighted mean of `parts` into `out`.
    ///
    /// # Arguments
    /// * `parts` - One vector per participant, all of `out.len()` elements.
    /// * `out` - Receives the mean.
    ///
    /// # Returns
    /// `AveragingTransport` if there are no parts, any length differs, or
    /// the mean is not finite.
    pub fn reduce(self, parts: &[&[f32]], out: &mut [f32]) -> Result<()> {
        if parts.is_empty() {
            return Err(OrchestraErr::AveragingTransport(
                "nothing to average".into(),
            ));
        }

        if let Some((i, p)) = parts.iter().enumerate().find(|(_, p)| p.len() != out.len()) {
            return Err(OrchestraErr::AveragingTransport(format!(
                "participant {i} sent {} values, expected {}",
                p.len(),
                out.len()
            )));
        }

        match self {
            Transport::Legacy => reduce_on_root(parts, out),
            Transport::PeerToPeer => reduce_segments(parts, out),
        }

        if out.iter().any(|v| !v.is_finite()) {
            return Err(OrchestraErr::AveragingTransport(
                "averaged state is not finite".into(),
            ));
        }

        Ok(())
    }
}

fn reduce_on_root(parts: &[&[f32]], out: &mut [f32]) {
    out.copy_from_slice(parts[0]);
    for part in &parts[1..] {
        for (acc, v) in out.iter_mut().zip(part.iter()) {
            *acc += v;
        }
    }

    let n = parts.len() as f32;
    out.iter_mut().for_each(|v| *v /= n);
}

/// One segment per participant, each reduced with a pairwise sum.
fn reduce_segments(parts: &[&[f32]], out: &mut [f32]) {
    let seg = out.len().div_ceil(parts.len()).max(1);
    let n = parts.len() as f32;

    out.par_chunks_mut(seg).enumerate().for_each(|(s, chunk)| {
        let base = s * seg;
        for (j, slot) in chunk.iter_mut().enumerate() {
            *slot = pairwise_sum(parts, base + j) / n;
        }
    });
}

fn pairwise_sum(parts: &[&[f32]], i: usize) -> f32 {
    match parts {
        [] => 0.0,
        [p] => p[i],
        _ => {
            let (lo, hi) = parts.split_at(parts.len() / 2);
            pairwise_sum(lo, i) + pairwise_sum(hi, i)
        }
    }
}
