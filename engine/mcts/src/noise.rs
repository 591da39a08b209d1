//! Dirichlet perturbation of root priors.
//!
//! Noise is never applied to a transposition-table entry: the tree hands
//! out a non-shareable clone first (see `NodeTree::non_tt_add_clone`), and
//! the perturbation happens on the clone before any child is realised.

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::low_node::LowNode;
use crate::params::SearchParams;

/// Mix Dirichlet noise into the priors of an unvisited low node and
/// re-sort the edges so the sorted-policy invariant keeps holding.
pub fn apply_dirichlet_noise<R: Rng>(low: &LowNode, params: &SearchParams, rng: &mut R) {
    assert_eq!(low.get_n(), 0, "noise applied to a visited node");
    let num_edges = low.num_edges() as usize;
    if num_edges == 0 || params.dirichlet_epsilon <= 0.0 {
        return;
    }

    let noise = dirichlet_noise(num_edges, params.dirichlet_alpha, rng);
    let eps = params.dirichlet_epsilon;
    for (index, sample) in noise.iter().enumerate() {
        let p = low.get_edge_at(index as u16).get_p();
        low.set_p_at(index as u16, (1.0 - eps) * p + eps * sample);
    }
    low.sort_edges();
}

/// Dirichlet-distributed vector via normalised Gamma variates.
fn dirichlet_noise<R: Rng>(n: usize, alpha: f32, rng: &mut R) -> Vec<f32> {
    let gamma = Gamma::new(alpha.max(1e-6) as f64, 1.0).expect("valid gamma parameters");
    let mut samples: Vec<f32> = (0..n).map(|_| gamma.sample(rng) as f32).collect();

    let sum: f32 = samples.iter().sum();
    if sum > 0.0 {
        for sample in &mut samples {
            *sample /= sum;
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NNEval;
    use engine_board::{Move, MoveList};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn evaluated(ucis: &[&str]) -> LowNode {
        let moves: MoveList = ucis.iter().map(|s| Move::from_uci(s).unwrap()).collect();
        let mut low = LowNode::new();
        low.set_nn_eval(&NNEval::uniform(&moves));
        low
    }

    #[test]
    fn test_dirichlet_noise_normalised() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let noise = dirichlet_noise(5, 0.3, &mut rng);
        let sum: f32 = noise.iter().sum();
        assert!((sum - 1.0).abs() < 0.01);
        assert!(noise.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_noise_keeps_priors_normalised() {
        let low = evaluated(&["e2e4", "d2d4", "g1f3", "c2c4"]);
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        apply_dirichlet_noise(&low, &SearchParams::default(), &mut rng);
        let sum: f32 = low.edges().iter().map(|e| e.get_p()).sum();
        assert!((sum - 1.0).abs() < 0.02);
        // Edges come back sorted.
        let priors: Vec<f32> = low.edges().iter().map(|e| e.get_p()).collect();
        assert!(priors.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_noise_disabled_by_epsilon() {
        let low = evaluated(&["e2e4", "d2d4"]);
        let before: Vec<f32> = low.edges().iter().map(|e| e.get_p()).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        apply_dirichlet_noise(&low, &SearchParams::for_match_play(), &mut rng);
        let after: Vec<f32> = low.edges().iter().map(|e| e.get_p()).collect();
        assert_eq!(before, after);
    }
}
