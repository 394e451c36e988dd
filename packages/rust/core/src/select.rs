//! Relevance scoring and budgeted selection of content blocks.
//!
//! Every block gets a score in `0.0..=1.0` combining its structural role,
//! its position on the page, and how densely it uses [`DOMAIN_LEXICON`].
//! Blocks are then taken greedily in score order until the character budget
//! would be exceeded.

use std::cmp::Ordering;

use tracing::debug;

use portfolio_shared::{BlockKind, ContentBlock, RankedBlock};

/// Vocabulary that signals company-profile content.
pub const DOMAIN_LEXICON: [&str; 32] = [
    "about",
    "award",
    "awards",
    "clients",
    "company",
    "customers",
    "expertise",
    "experience",
    "founded",
    "headquartered",
    "industry",
    "industries",
    "leadership",
    "mission",
    "offer",
    "offers",
    "partners",
    "platform",
    "product",
    "products",
    "service",
    "services",
    "solution",
    "solutions",
    "specialize",
    "specializes",
    "team",
    "technology",
    "trusted",
    "values",
    "vision",
    "years",
];

const TYPE_WEIGHT: f64 = 0.5;
const POSITION_WEIGHT: f64 = 0.3;
const KEYWORD_WEIGHT: f64 = 0.2;

/// Lexicon share at which the keyword component saturates.
const KEYWORD_SATURATION: f64 = 0.25;

/// Score every block and mark which fit in `budget` characters.
///
/// The result is in rank order. The highest-ranked block is always
/// included, even when it alone exceeds the budget; after that, selection
/// stops at the first block that would overflow.
pub fn select(blocks: &[ContentBlock], budget: usize) -> Vec<RankedBlock> {
    let mut ranked: Vec<RankedBlock> = blocks
        .iter()
        .map(|block| RankedBlock {
            score: score(block),
            block: block.clone(),
            included: false,
        })
        .collect();

    ranked.sort_by(rank_order);

    let mut used = 0usize;
    for (rank, candidate) in ranked.iter_mut().enumerate() {
        let len = candidate.block.char_len();
        if rank > 0 && used + len > budget {
            break;
        }
        candidate.included = true;
        used += len;
    }

    debug!(
        blocks = ranked.len(),
        included = ranked.iter().filter(|r| r.included).count(),
        used_chars = used,
        budget,
        "blocks selected"
    );
    ranked
}

/// Relevance of one block in `0.0..=1.0`.
pub fn score(block: &ContentBlock) -> f64 {
    TYPE_WEIGHT * type_weight(block.kind)
        + POSITION_WEIGHT * position_weight(block.position)
        + KEYWORD_WEIGHT * keyword_density(&block.text)
}

fn type_weight(kind: BlockKind) -> f64 {
    match kind {
        BlockKind::Heading { .. } => 1.0,
        BlockKind::Paragraph => 0.7,
        BlockKind::ListItem => 0.4,
    }
}

/// `1 / (1 + position / 10)`: 1.0 for the first block, halved by position 10.
fn position_weight(position: usize) -> f64 {
    1.0 / (1.0 + position as f64 / 10.0)
}

fn keyword_density(text: &str) -> f64 {
    let mut words = 0usize;
    let mut hits = 0usize;
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        words += 1;
        if DOMAIN_LEXICON.contains(&word.to_lowercase().as_str()) {
            hits += 1;
        }
    }
    if words == 0 {
        return 0.0;
    }
    (hits as f64 / words as f64 / KEYWORD_SATURATION).min(1.0)
}

/// Score descending, then page and position ascending.
fn rank_order(a: &RankedBlock, b: &RankedBlock) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.block.page_index.cmp(&b.block.page_index))
        .then(a.block.position.cmp(&b.block.position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn block(page_index: usize, position: usize, kind: BlockKind, text: &str) -> ContentBlock {
        ContentBlock::new(
            page_index,
            Url::parse("https://acme.test/").unwrap(),
            kind,
            text,
            position,
        )
        .unwrap()
    }

    fn para(position: usize, text: &str) -> ContentBlock {
        block(0, position, BlockKind::Paragraph, text)
    }

    #[test]
    fn headings_beat_paragraphs_beat_lists() {
        let h = score(&block(0, 3, BlockKind::Heading { level: 2 }, "Widgets"));
        let p = score(&para(3, "Widgets"));
        let l = score(&block(0, 3, BlockKind::ListItem, "Widgets"));
        assert!(h > p && p > l);
    }

    #[test]
    fn position_weight_never_increases() {
        let scores: Vec<f64> = (0..50).map(|pos| score(&para(pos, "Plain text"))).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn lexicon_words_raise_the_score() {
        let plain = score(&para(0, "We like blue boats"));
        let rich = score(&para(0, "Our services and products since founded"));
        assert!(rich > plain);
    }

    #[test]
    fn greedy_selection_respects_budget() {
        let blocks = vec![
            para(0, "aaaaaaaaaa"),
            para(1, "bbbbbbbbbb"),
            para(2, "cccccccccc"),
            para(3, "dddddddddd"),
        ];
        let ranked = select(&blocks, 25);
        let included: Vec<&str> = ranked
            .iter()
            .filter(|r| r.included)
            .map(|r| r.block.text.as_str())
            .collect();
        assert_eq!(included, vec!["aaaaaaaaaa", "bbbbbbbbbb"]);
        assert_eq!(ranked.len(), 4);
    }

    #[test]
    fn top_block_included_even_over_budget() {
        let blocks = vec![para(0, "a long paragraph that is over budget")];
        let ranked = select(&blocks, 5);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].included);
    }

    #[test]
    fn ties_break_by_page_then_position() {
        let blocks = vec![
            block(1, 0, BlockKind::Paragraph, "Same"),
            block(0, 0, BlockKind::Paragraph, "Same"),
        ];
        let ranked = select(&blocks, 100);
        assert_eq!(ranked[0].block.page_index, 0);
        assert_eq!(ranked[1].block.page_index, 1);
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert!(select(&[], 100).is_empty());
    }

    #[test]
    fn selection_is_deterministic() {
        let blocks: Vec<ContentBlock> = (0..20)
            .map(|i| para(i, &format!("Block {i} about our services")))
            .collect();
        assert_eq!(select(&blocks, 120), select(&blocks, 120));
    }
}
