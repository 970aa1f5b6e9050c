use rand::rngs::StdRng;
use rand::Rng;

/// Nucleus sampling over a probability distribution.
///
/// Keeps the most likely tokens whose preceding cumulative mass is within
/// `top_p`, renormalises them and draws one.
pub fn sample_top_p(probs: &[f32], top_p: f32, rng: &mut StdRng) -> usize {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut kept = 0;
    let mut cumulative = 0.0f32;
    for &i in &order {
        if kept > 0 && cumulative > top_p {
            break;
        }
        cumulative += probs[i];
        kept += 1;
    }
    let nucleus = &order[..kept.max(1)];

    let mass: f32 = nucleus.iter().map(|&i| probs[i]).sum();
    let mut target = rng.random::<f32>() * mass;
    for &i in nucleus {
        target -= probs[i];
        if target <= 0.0 {
            return i;
        }
    }
    nucleus[nucleus.len() - 1]
}
