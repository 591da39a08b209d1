//! Search-graph tuning parameters.

/// Parameters the graph layer needs from the search configuration: the
/// Dirichlet perturbation applied to root clones and the draw score folded
/// into Q by eval consumers.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Dirichlet concentration. Scaled for chess-like branching factors;
    /// set to 0.0 to disable root noise.
    pub dirichlet_alpha: f32,

    /// Fraction of the root prior replaced by noise.
    pub dirichlet_epsilon: f32,

    /// Contribution of the draw probability to Q, in [-1, 1].
    pub draw_score: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.25,
            draw_score: 0.0,
        }
    }
}

impl SearchParams {
    /// Parameters for a noisy root during self-play.
    pub fn for_noisy_root() -> Self {
        Self::default()
    }

    /// Parameters for match play: no root perturbation.
    pub fn for_match_play() -> Self {
        Self {
            dirichlet_alpha: 0.0,
            dirichlet_epsilon: 0.0,
            ..Self::default()
        }
    }

    pub fn with_dirichlet(mut self, alpha: f32, epsilon: f32) -> Self {
        self.dirichlet_alpha = alpha;
        self.dirichlet_epsilon = epsilon;
        self
    }

    pub fn with_draw_score(mut self, draw_score: f32) -> Self {
        self.draw_score = draw_score;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SearchParams::default();
        assert!((params.dirichlet_alpha - 0.3).abs() < 1e-6);
        assert!((params.dirichlet_epsilon - 0.25).abs() < 1e-6);
        assert_eq!(params.draw_score, 0.0);
    }

    #[test]
    fn test_match_play_disables_noise() {
        let params = SearchParams::for_match_play();
        assert_eq!(params.dirichlet_alpha, 0.0);
        assert_eq!(params.dirichlet_epsilon, 0.0);
    }

    #[test]
    fn test_builders() {
        let params = SearchParams::default()
            .with_dirichlet(0.15, 0.5)
            .with_draw_score(-0.1);
        assert!((params.dirichlet_alpha - 0.15).abs() < 1e-6);
        assert!((params.dirichlet_epsilon - 0.5).abs() < 1e-6);
        assert!((params.draw_score - (-0.1)).abs() < 1e-6);
    }
}
