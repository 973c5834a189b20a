//! Expression → matching-model compilation.
//!
//! Compilation has three steps:
//!
//! 1. **Preprocess** the parsed node list so every `*` boundary sits
//!    immediately after the last value node before it. Bounded gaps written
//!    at the end of one subsequence are equivalent to the same gaps at the
//!    start of the next, and the model records inter-subsequence gaps on the
//!    following subsequence. `{n-*}` splits into `*` followed by `{n}`.
//!    Sequences anchored to the end of the file are preprocessed in reverse
//!    so the gaps land on their EOF-ward side.
//! 2. **Select an anchor** per subsequence: scan the nodes left to right
//!    accumulating a literal run length (bytes and ranges count 1, strings
//!    their length); any-bytes, gaps and alternatives break the run. The
//!    longest run wins, the earliest on a tie. A subsequence with no run at
//!    all cannot be searched for and fails to compile.
//! 3. **Build fragments** from the nodes on either side of the anchor,
//!    accumulating wildcard gaps into offset windows and turning
//!    alternatives into multiple fragments at one position. Gaps left over
//!    at the outer edge become the subsequence's own offset window.

use crate::pattern::{ByteMatcher, SequenceMatcher};
use crate::signature::fragment::SideFragment;
use crate::signature::subsequence::SubSequenceBuilder;

use super::parser::{parse_expression, Node};
use super::CompileError;

/// Compiles a whole byte-sequence expression into subsequence builders,
/// in subsequence order.
pub fn compile_expression(
    expression: &str,
    anchored_to_eof: bool,
) -> Result<Vec<SubSequenceBuilder>, CompileError> {
    let nodes = preprocess(parse_expression(expression)?, anchored_to_eof);

    let mut builders = Vec::new();
    let mut start = 0;
    for (index, node) in nodes.iter().enumerate() {
        if matches!(node, Node::Wildcard) {
            builders.push(build_subsequence(&nodes[start..index], anchored_to_eof, expression)?);
            start = index + 1;
        }
    }
    // A trailing * leaves no final subsequence, which is fine.
    if start < nodes.len() {
        builders.push(build_subsequence(&nodes[start..], anchored_to_eof, expression)?);
    }
    if builders.is_empty() {
        return Err(CompileError::NoAnchor { expression: expression.to_string() });
    }
    Ok(builders)
}

/// Compiles anchor text from a structured signature definition: a plain
/// fixed-length sequence with no gaps, alternatives or `*` wildcards.
pub fn compile_anchor(text: &str) -> Result<SequenceMatcher, CompileError> {
    compile_fixed_sequence(text, "anchor")
}

/// Compiles fragment text from a structured signature definition. Fragments
/// are always fixed-length; their variability lives in the offset window.
pub fn compile_fragment(text: &str) -> Result<SequenceMatcher, CompileError> {
    compile_fixed_sequence(text, "fragment")
}

fn compile_fixed_sequence(text: &str, what: &str) -> Result<SequenceMatcher, CompileError> {
    let nodes = parse_expression(text)?;
    let mut matchers = Vec::new();
    for node in &nodes {
        if !push_value_matchers(node, &mut matchers) {
            return Err(CompileError::Syntax {
                message: format!("only bytes, ranges, strings and ?? may appear in a {what}"),
                position: 0,
                expression: text.to_string(),
            });
        }
    }
    if matchers.is_empty() {
        return Err(CompileError::NoAnchor { expression: text.to_string() });
    }
    Ok(SequenceMatcher::new(matchers))
}

/// Appends the matchers for a value node; false if the node is not a value.
fn push_value_matchers(node: &Node, matchers: &mut Vec<ByteMatcher>) -> bool {
    match node {
        Node::Byte { value, inverted } => {
            matchers.push(if *inverted { ByteMatcher::Not(*value) } else { ByteMatcher::Literal(*value) });
        }
        Node::Range { from, to, inverted } => {
            matchers.push(if *inverted {
                ByteMatcher::NotRange(*from, *to)
            } else {
                ByteMatcher::Range(*from, *to)
            });
        }
        Node::Literal(bytes) => {
            matchers.extend(bytes.iter().map(|b| ByteMatcher::Literal(*b)));
        }
        Node::Any => matchers.push(ByteMatcher::Any),
        _ => return false,
    }
    true
}

/// Node-list normalisation ahead of subsequence splitting.
fn preprocess(nodes: Vec<Node>, anchored_to_eof: bool) -> Vec<Node> {
    let mut list: Vec<Node> = Vec::new();
    let mut last_value_position: isize = -1;

    let ordered: Vec<Node> = if anchored_to_eof {
        nodes.into_iter().rev().collect()
    } else {
        nodes
    };

    for node in ordered {
        list.push(node);
        let current = list.len() - 1;
        match &list[current] {
            Node::Byte { .. }
            | Node::Range { .. }
            | Node::Literal(_)
            | Node::Any
            | Node::Alternatives(_) => {
                last_value_position = current as isize;
            }
            Node::Wildcard => {
                let insert_at = (last_value_position + 1) as usize;
                if insert_at < current {
                    let wildcard = list.remove(current);
                    list.insert(insert_at, wildcard);
                }
            }
            Node::GapToMany { min } => {
                let min = *min;
                list[current] = Node::Gap { size: min };
                list.insert((last_value_position + 1) as usize, Node::Wildcard);
            }
            Node::Gap { .. } | Node::GapRange { .. } => {}
        }
    }

    if anchored_to_eof {
        list.reverse();
    }
    list
}

fn build_subsequence(
    nodes: &[Node],
    anchored_to_eof: bool,
    expression: &str,
) -> Result<SubSequenceBuilder, CompileError> {
    // Anchor selection: greedy longest literal run, earliest wins on ties
    // (strict > comparison).
    let mut best_len = 0usize;
    let mut best_start = 0usize;
    let mut best_end = 0usize;
    let mut run_len = 0usize;
    let mut run_start = 0usize;
    for (index, node) in nodes.iter().enumerate() {
        match node {
            Node::Byte { .. } | Node::Range { .. } => run_len += 1,
            Node::Literal(bytes) => run_len += bytes.len(),
            Node::Any
            | Node::Gap { .. }
            | Node::GapRange { .. }
            | Node::GapToMany { .. }
            | Node::Alternatives(_)
            | Node::Wildcard => {
                if run_len > best_len {
                    best_len = run_len;
                    best_start = run_start;
                    best_end = index;
                }
                run_len = 0;
                run_start = index + 1;
            }
        }
    }
    if run_len > best_len {
        best_len = run_len;
        best_start = run_start;
        best_end = nodes.len();
    }
    if best_len == 0 {
        return Err(CompileError::NoAnchor { expression: expression.to_string() });
    }

    let mut anchor_matchers = Vec::with_capacity(best_len);
    for node in &nodes[best_start..best_end] {
        push_value_matchers(node, &mut anchor_matchers);
    }
    let anchor = SequenceMatcher::new(anchor_matchers);

    let (left_fragments, left_gaps) = build_side_fragments(&nodes[..best_start], true)?;
    let (right_fragments, right_gaps) = build_side_fragments(&nodes[best_end..], false)?;

    // The leftover outer gap anchors the subsequence itself: from the BOF
    // side normally, from the EOF side for end-anchored sequences.
    let (min_offset, max_offset) = if anchored_to_eof { right_gaps } else { left_gaps };

    Ok(SubSequenceBuilder::new(
        anchor,
        left_fragments,
        right_fragments,
        i64::from(min_offset),
        i64::from(max_offset),
    ))
}

/// Builds the ordered fragment positions for one side of an anchor.
///
/// For the left side the nodes are walked from the anchor outward (right to
/// left); for the right side, left to right. Returns the fragment lists in
/// position order plus the gap left over at the outer edge.
fn build_side_fragments(
    nodes: &[Node],
    left_side: bool,
) -> Result<(Vec<Vec<SideFragment>>, (u32, u32)), CompileError> {
    fn flush_run(
        run: &mut Vec<&Node>,
        fragments: &mut Vec<Vec<SideFragment>>,
        position: &mut usize,
        min_gap: &mut u32,
        max_gap: &mut u32,
        left_side: bool,
    ) {
        if run.is_empty() {
            return;
        }
        let mut matchers = Vec::new();
        if left_side {
            // The run was collected walking away from the anchor.
            for &node in run.iter().rev() {
                push_value_matchers(node, &mut matchers);
            }
        } else {
            for &node in run.iter() {
                push_value_matchers(node, &mut matchers);
            }
        }
        let min = i64::from(*min_gap);
        let max = i64::from((*max_gap).max(*min_gap));
        fragments.push(vec![SideFragment::new(SequenceMatcher::new(matchers), min, max, *position)]);
        *position += 1;
        *min_gap = 0;
        *max_gap = 0;
        run.clear();
    }

    let mut fragments: Vec<Vec<SideFragment>> = Vec::new();
    let mut position = 1usize;
    let mut min_gap = 0u32;
    let mut max_gap = 0u32;
    let mut run: Vec<&Node> = Vec::new();

    let ordered: Vec<&Node> = if left_side {
        nodes.iter().rev().collect()
    } else {
        nodes.iter().collect()
    };

    for node in ordered {
        match node {
            Node::Byte { .. } | Node::Range { .. } | Node::Literal(_) | Node::Any => {
                run.push(node);
            }
            Node::Gap { size } => {
                flush_run(&mut run, &mut fragments, &mut position, &mut min_gap, &mut max_gap, left_side);
                min_gap += size;
                max_gap += size;
            }
            Node::GapRange { min, max } => {
                flush_run(&mut run, &mut fragments, &mut position, &mut min_gap, &mut max_gap, left_side);
                min_gap += min;
                max_gap += max;
            }
            Node::Alternatives(alternatives) => {
                flush_run(&mut run, &mut fragments, &mut position, &mut min_gap, &mut max_gap, left_side);
                let min = i64::from(min_gap);
                let max = i64::from(max_gap.max(min_gap));
                let mut options = Vec::with_capacity(alternatives.len());
                for alternative in alternatives {
                    let mut matchers = Vec::new();
                    for inner in alternative {
                        push_value_matchers(inner, &mut matchers);
                    }
                    options.push(SideFragment::new(SequenceMatcher::new(matchers), min, max, position));
                }
                fragments.push(options);
                position += 1;
                min_gap = 0;
                max_gap = 0;
            }
            // Split out before fragment building.
            Node::GapToMany { .. } | Node::Wildcard => {
                unreachable!("wildcard gaps are removed during preprocessing")
            }
        }
    }
    flush_run(&mut run, &mut fragments, &mut position, &mut min_gap, &mut max_gap, left_side);

    if max_gap < min_gap {
        max_gap = min_gap;
    }
    Ok((fragments, (min_gap, max_gap)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_one(expression: &str) -> SubSequenceBuilder {
        let mut builders = compile_expression(expression, false).unwrap();
        assert_eq!(builders.len(), 1, "expected one subsequence for {expression}");
        builders.remove(0)
    }

    #[test]
    fn plain_hex_becomes_a_pure_anchor() {
        let built = compile_one("25504446");
        assert_eq!(built.anchor().to_expression(), "25 50 44 46");
        assert!(built.left_fragments().is_empty());
        assert!(built.right_fragments().is_empty());
        assert_eq!((built.min_seq_offset(), built.max_seq_offset()), (0, 0));
    }

    #[test]
    fn gap_between_single_bytes_keeps_earliest_run() {
        // Both runs have length one; the strict > comparison keeps the first.
        let built = compile_one("41 {2-4} 42");
        assert_eq!(built.anchor().to_expression(), "41");
        assert!(built.left_fragments().is_empty());
        let right = built.right_fragments();
        assert_eq!(right.len(), 1);
        assert_eq!(right[0].len(), 1);
        assert_eq!(right[0][0].to_expression(), "42");
        assert_eq!(right[0][0].min_offset(), 2);
        assert_eq!(right[0][0].max_offset(), 4);
    }

    #[test]
    fn longest_run_wins_over_an_earlier_shorter_one() {
        let built = compile_one("41 42 {3} 43 44 45");
        assert_eq!(built.anchor().to_expression(), "43 44 45");
        let left = built.left_fragments();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0][0].to_expression(), "41 42");
        assert_eq!((left[0][0].min_offset(), left[0][0].max_offset()), (3, 3));
    }

    #[test]
    fn strings_count_their_length_for_anchor_selection() {
        let built = compile_one("41 {2} 'PK'");
        assert_eq!(built.anchor().to_expression(), "50 4B");
    }

    #[test]
    fn any_byte_breaks_the_anchor_but_joins_fragments() {
        let built = compile_one("41 42 ?? 43");
        assert_eq!(built.anchor().to_expression(), "41 42");
        let right = built.right_fragments();
        assert_eq!(right.len(), 1);
        assert_eq!(right[0][0].to_expression(), "?? 43");
        assert_eq!((right[0][0].min_offset(), right[0][0].max_offset()), (0, 0));
    }

    #[test]
    fn alternatives_become_fragment_options_at_one_position() {
        let built = compile_one("(41|4243) 50 51 52");
        assert_eq!(built.anchor().to_expression(), "50 51 52");
        let left = built.left_fragments();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].len(), 2);
        assert_eq!(left[0][0].to_expression(), "41");
        assert_eq!(left[0][1].to_expression(), "42 43");
        assert_eq!(left[0][0].position(), 1);
        assert_eq!(left[0][1].position(), 1);
    }

    #[test]
    fn multiple_fragment_positions_accumulate_gaps() {
        let built = compile_one("50 51 52 {1-2} 41 {3} 42");
        let right = built.right_fragments();
        assert_eq!(right.len(), 2);
        assert_eq!(right[0][0].to_expression(), "41");
        assert_eq!((right[0][0].min_offset(), right[0][0].max_offset()), (1, 2));
        assert_eq!(right[1][0].to_expression(), "42");
        assert_eq!((right[1][0].min_offset(), right[1][0].max_offset()), (3, 3));
        assert_eq!(right[1][0].position(), 2);
    }

    #[test]
    fn wildcard_splits_subsequences_and_moves_gaps() {
        // A gap before the * belongs to the following subsequence.
        let builders = compile_expression("01 02 {5} * 03", false).unwrap();
        assert_eq!(builders.len(), 2);
        assert_eq!(builders[0].anchor().to_expression(), "01 02");
        assert_eq!((builders[0].min_seq_offset(), builders[0].max_seq_offset()), (0, 0));
        assert_eq!(builders[1].anchor().to_expression(), "03");
        assert_eq!((builders[1].min_seq_offset(), builders[1].max_seq_offset()), (5, 5));
    }

    #[test]
    fn min_to_many_gap_splits_into_wildcard_and_fixed_gap() {
        let builders = compile_expression("41 {2-*} 42", false).unwrap();
        assert_eq!(builders.len(), 2);
        assert_eq!(builders[0].anchor().to_expression(), "41");
        assert_eq!(builders[1].anchor().to_expression(), "42");
        assert_eq!((builders[1].min_seq_offset(), builders[1].max_seq_offset()), (2, 2));
    }

    #[test]
    fn eof_sequences_attach_leftover_gaps_on_the_eof_side() {
        let builders = compile_expression("41 * {3} 42", true).unwrap();
        assert_eq!(builders.len(), 2);
        // The {3} sits between the subsequences; scanned backwards from EOF,
        // it bounds the earlier (leftmost) subsequence.
        assert_eq!(builders[0].anchor().to_expression(), "41");
        assert_eq!((builders[0].min_seq_offset(), builders[0].max_seq_offset()), (3, 3));
        assert_eq!(builders[1].anchor().to_expression(), "42");
        assert_eq!((builders[1].min_seq_offset(), builders[1].max_seq_offset()), (0, 0));
    }

    #[test]
    fn leading_fixed_gap_becomes_the_subsequence_offset() {
        let built = compile_one("{4} 41 42 43");
        assert_eq!(built.anchor().to_expression(), "41 42 43");
        assert!(built.left_fragments().is_empty());
        assert_eq!((built.min_seq_offset(), built.max_seq_offset()), (4, 4));
    }

    #[test]
    fn all_gaps_and_alternatives_cannot_anchor() {
        assert!(matches!(
            compile_expression("?? {4} (41|42)", false),
            Err(CompileError::NoAnchor { .. })
        ));
        assert!(matches!(
            compile_expression("41 * ?? ", false),
            Err(CompileError::NoAnchor { .. })
        ));
    }

    #[test]
    fn fixed_sequences_reject_structure() {
        assert!(compile_anchor("41 42 ['A']").is_err());
        assert!(compile_anchor("41 {2} 42").is_err());
        assert!(compile_fragment("(41|42)").is_err());
        assert!(compile_fragment("").is_err());
        assert_eq!(compile_fragment("[30:39] ?? 'x'").unwrap().to_expression(), "[30:39] ?? 78");
    }

    #[test]
    fn compilation_is_deterministic() {
        let first = compile_one("41 {1-3} (42|43) 44 45 46 ?? 47");
        let second = compile_one("41 {1-3} (42|43) 44 45 46 ?? 47");
        assert_eq!(first.anchor().to_expression(), second.anchor().to_expression());
        assert_eq!(first.left_fragments().len(), second.left_fragments().len());
        assert_eq!(first.right_fragments().len(), second.right_fragments().len());
    }
}
