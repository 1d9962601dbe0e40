use smallvec::SmallVec;

/// One vertex of the effective path view used by the multiple importance
/// sampling weight: the full candidate path in emitter-to-sensor order, with
/// direct-sampling substitutions already applied. Replaces the original's
/// temporary endpoint swap; the weight function only ever sees this value.
#[derive(Copy, Clone, Debug, Default)]
pub struct MisVertex {
    /// Area pdf of generating this vertex from its emitter-side neighbor
    /// (position pdf, including emitter pick, for the first vertex).
    pub p_fwd: f32,
    /// Area pdf of generating this vertex from its sensor-side neighbor
    /// (position pdf for the last vertex).
    pub p_bwd: f32,
    /// Whether a connection edge can end at this vertex.
    pub connectable: bool,
    /// Direct-sampling pdf override; only read on the first and last vertex.
    pub p_direct: f32,
}

pub type MisVertices = SmallVec<[MisVertex; 2 * crate::path::MAX_INLINE_PATH]>;

/// Balance-heuristic weight of the strategy that sampled `s` vertices from
/// the emitter side, over every strategy that could produce the same path.
///
/// `vertices` holds the n real vertices of the candidate; strategy i sampled
/// the first i of them from the emitter. Relative strategy probabilities are
/// built from pdf ratios anchored at the actual strategy (Veach eq. 10.9).
pub fn balance_weight(
    vertices: &[MisVertex],
    s: usize,
    sample_direct: bool,
    light_image: bool,
) -> f32 {
    let n = vertices.len();
    debug_assert!(n >= 2, "a complete path has at least two real vertices");
    debug_assert!((1..n).contains(&s), "strategy {} out of range for {} vertices", s, n);

    let mut ps: SmallVec<[f32; 2 * crate::path::MAX_INLINE_PATH]> = SmallVec::new();
    ps.resize(n, 0.0);
    ps[s - 1] = 1.0; // ps[i-1] is the relative probability of strategy i

    // towards the sensor: strategy i+1 samples x_{i+1} from the emitter side
    let mut alive = true;
    for i in s..n - 1 {
        let v = &vertices[i]; // x_{i+1}
        if !alive || v.p_bwd <= 0.0 {
            alive = false;
            ps[i] = 0.0;
            continue;
        }
        ps[i] = ps[i - 1] * v.p_fwd / v.p_bwd;
        if !ps[i].is_finite() {
            alive = false;
            ps[i] = 0.0;
        }
    }
    // towards the emitter: strategy i-1 samples x_i from the sensor side
    alive = true;
    for i in (1..s).rev() {
        let v = &vertices[i]; // x_{i+1} of strategy i
        if !alive || v.p_fwd <= 0.0 {
            alive = false;
            ps[i - 1] = 0.0;
            continue;
        }
        ps[i - 1] = ps[i] * v.p_bwd / v.p_fwd;
        if !ps[i - 1].is_finite() {
            alive = false;
            ps[i - 1] = 0.0;
        }
    }

    // direct-sampling strategies replace the endpoint pdf
    if sample_direct {
        let first = &vertices[0];
        if first.p_fwd > 0.0 && first.p_direct > 0.0 {
            ps[0] *= first.p_direct / first.p_fwd;
        }
        let last = &vertices[n - 1];
        if last.p_bwd > 0.0 && last.p_direct > 0.0 {
            ps[n - 2] *= last.p_direct / last.p_bwd;
        }
    }

    let mut sum = 0.0;
    for i in 1..n {
        if !strategy_valid(vertices, i, sample_direct, light_image) {
            continue;
        }
        sum += ps[i - 1];
    }
    debug_assert!(
        strategy_valid(vertices, s, sample_direct, light_image),
        "committed strategy {} is not in its own universe",
        s
    );
    if sum <= 0.0 {
        return 0.0;
    }
    let weight = ps[s - 1] / sum;
    debug_assert!(weight.is_finite(), "non-finite MIS weight {:?}", ps);
    weight
}

/// A strategy exists when its connection edge can actually be formed.
fn strategy_valid(vertices: &[MisVertex], i: usize, sample_direct: bool, light_image: bool) -> bool {
    let n = vertices.len();
    let t = n - i;
    if t == 1 && !light_image {
        return false;
    }
    let left = &vertices[i - 1];
    let right = &vertices[i];
    let left_ok = if i == 1 {
        left.connectable || (sample_direct && left.p_direct > 0.0)
    } else {
        left.connectable
    };
    let right_ok = if i == n - 1 {
        right.connectable || (sample_direct && right.p_direct > 0.0)
    } else {
        right.connectable
    };
    left_ok && right_ok
}
