//! Influence scoring over the follow graph.
//!
//! Standard power-iteration PageRank. An edge (a, b) means a follows b, so
//! rank flows from follower to followed and high in-degree accounts
//! accumulate score. Raw ranks are min-max normalized to [0, 1] so scores
//! stay comparable across graphs of different sizes.

use std::collections::HashMap;

use spindle_common::InfluenceScore;

#[derive(Debug, Clone, Copy)]
pub struct PageRankParams {
    pub damping: f64,
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Compute normalized influence scores for every node touched by an edge.
pub fn pagerank(edges: &[(String, String)], params: PageRankParams) -> Vec<InfluenceScore> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut nodes: Vec<&str> = Vec::new();
    for (source, target) in edges {
        for id in [source.as_str(), target.as_str()] {
            if !index.contains_key(id) {
                index.insert(id, nodes.len());
                nodes.push(id);
            }
        }
    }
    let n = nodes.len();
    if n == 0 {
        return Vec::new();
    }

    let mut out_links: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0u32; n];
    for (source, target) in edges {
        let s = index[source.as_str()];
        let t = index[target.as_str()];
        out_links[s].push(t);
        in_degree[t] += 1;
    }

    let uniform = 1.0 / n as f64;
    let mut ranks = vec![uniform; n];
    let mut next = vec![0.0; n];

    for iteration in 0..params.max_iterations {
        let base = (1.0 - params.damping) / n as f64;
        // Rank parked on dangling nodes is spread evenly.
        let dangling: f64 = (0..n)
            .filter(|&i| out_links[i].is_empty())
            .map(|i| ranks[i])
            .sum();
        let dangling_share = params.damping * dangling / n as f64;

        for value in next.iter_mut() {
            *value = base + dangling_share;
        }
        for (i, targets) in out_links.iter().enumerate() {
            if targets.is_empty() {
                continue;
            }
            let share = params.damping * ranks[i] / targets.len() as f64;
            for &t in targets {
                next[t] += share;
            }
        }

        let delta: f64 = ranks
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        std::mem::swap(&mut ranks, &mut next);
        if delta < params.tolerance {
            tracing::debug!(iterations = iteration + 1, nodes = n, "PageRank converged");
            break;
        }
    }

    let normalized = normalize(&ranks);
    nodes
        .iter()
        .enumerate()
        .map(|(i, id)| InfluenceScore {
            user_id: (*id).to_string(),
            score: normalized[i],
            in_degree: in_degree[i],
            out_degree: out_links[i].len() as u32,
        })
        .collect()
}

/// Min-max normalize to [0, 1]. A degenerate spread (all ranks equal,
/// including the single-node case) maps everything to 1.0.
fn normalize(ranks: &[f64]) -> Vec<f64> {
    let min = ranks.iter().copied().fold(f64::INFINITY, f64::min);
    let max = ranks.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max - min < f64::EPSILON {
        return vec![1.0; ranks.len()];
    }
    ranks.iter().map(|r| (r - min) / (max - min)).collect()
}

/// Highest-scoring `k` entries, ties broken by user id for stable output.
pub fn top_k(mut scores: Vec<InfluenceScore>, k: usize) -> Vec<InfluenceScore> {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    scores.truncate(k);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    fn score_of<'a>(scores: &'a [InfluenceScore], id: &str) -> &'a InfluenceScore {
        scores
            .iter()
            .find(|s| s.user_id == id)
            .unwrap_or_else(|| panic!("no score for {id}"))
    }

    #[test]
    fn empty_graph_yields_no_scores() {
        assert!(pagerank(&[], PageRankParams::default()).is_empty());
    }

    #[test]
    fn hub_with_many_followers_ranks_highest() {
        // a, b, c all follow hub; hub follows nobody.
        let scores = pagerank(
            &edges(&[("a", "hub"), ("b", "hub"), ("c", "hub")]),
            PageRankParams::default(),
        );
        let hub = score_of(&scores, "hub");
        assert_eq!(hub.score, 1.0);
        assert_eq!(hub.in_degree, 3);
        assert_eq!(hub.out_degree, 0);
        for id in ["a", "b", "c"] {
            assert!(score_of(&scores, id).score < hub.score);
        }
    }

    #[test]
    fn rank_flows_along_chains() {
        // a -> b -> c: c inherits rank through b, so c > b > a.
        let scores = pagerank(&edges(&[("a", "b"), ("b", "c")]), PageRankParams::default());
        let a = score_of(&scores, "a").score;
        let b = score_of(&scores, "b").score;
        let c = score_of(&scores, "c").score;
        assert!(c > b, "c={c} b={b}");
        assert!(b > a, "b={b} a={a}");
        assert_eq!(a, 0.0);
        assert_eq!(c, 1.0);
    }

    #[test]
    fn symmetric_graph_degenerates_to_all_ones() {
        let scores = pagerank(&edges(&[("a", "b"), ("b", "a")]), PageRankParams::default());
        assert!(scores.iter().all(|s| s.score == 1.0));
    }

    #[test]
    fn duplicate_edges_count_toward_degrees() {
        let scores = pagerank(&edges(&[("a", "b"), ("a", "b")]), PageRankParams::default());
        let b = score_of(&scores, "b");
        assert_eq!(b.in_degree, 2);
        assert_eq!(score_of(&scores, "a").out_degree, 2);
    }

    #[test]
    fn top_k_orders_and_truncates() {
        let scores = pagerank(
            &edges(&[("a", "hub"), ("b", "hub"), ("a", "b")]),
            PageRankParams::default(),
        );
        let top = top_k(scores, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user_id, "hub");
        assert!(top[0].score >= top[1].score);
    }
}
