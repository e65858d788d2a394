// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::expect_used, clippy::unwrap_used)]
mod common;

use std::collections::HashSet;

use common::{c, Page};
use proptest::prelude::*;
use ripple_core::tree::is_descendant;
use ripple_core::{dedupe, StreamingSession};
use ripple_proto::{ComponentId, FramingToken};

/// Random forest: node `i > 0` hangs under a node `< i`, or starts a new
/// root. Batch entries index into the node list (duplicates allowed).
fn forest_and_batch() -> impl Strategy<Value = (Vec<Option<usize>>, Vec<usize>)> {
    (1usize..40).prop_flat_map(|n| {
        let parents = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(None).boxed()
                } else {
                    prop::option::weighted(0.85, 0..i).boxed()
                }
            })
            .collect::<Vec<_>>();
        (parents, prop::collection::vec(0..n, 0..24))
    })
}

fn build(parents: &[Option<usize>]) -> Page {
    let mut page = Page::default();
    for (i, parent) in parents.iter().enumerate() {
        page = match parent {
            None => page.root(i as u64, "div"),
            Some(p) => page.child(i as u64, *p as u64, "div"),
        };
    }
    page
}

fn covers(page: &Page, wrappers: &[ComponentId], id: ComponentId) -> bool {
    wrappers
        .iter()
        .any(|&w| w == id || is_descendant(page, id, w))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn wrappers_cover_the_batch_without_overlap((parents, picks) in forest_and_batch()) {
        let page = build(&parents);
        let batch: Vec<ComponentId> = picks.iter().map(|&i| c(i as u64)).collect();
        let wrappers = dedupe(&page, &batch);

        for &id in &batch {
            prop_assert!(covers(&page, &wrappers, id), "{id} not covered");
        }
        let unique: HashSet<_> = wrappers.iter().copied().collect();
        prop_assert_eq!(unique.len(), wrappers.len());
        for &w in &wrappers {
            prop_assert!(batch.contains(&w));
            for &other in &wrappers {
                prop_assert!(!is_descendant(&page, w, other), "{w} nested in {other}");
            }
        }
    }

    #[test]
    fn encoder_emits_the_same_wrappers_and_each_region_once((parents, picks) in forest_and_batch()) {
        let page = build(&parents);
        let batch: Vec<ComponentId> = picks.iter().map(|&i| c(i as u64)).collect();
        let expected = dedupe(&page, &batch);

        let mut session = StreamingSession::new(FramingToken::new("p"));
        let encoded = session.encode_batch(&page, &batch);
        prop_assert_eq!(encoded.components, expected.as_slice());
        prop_assert_eq!(encoded.is_empty(), batch.is_empty());

        for i in 0..parents.len() {
            let region = format!("<!--c:{i}-->");
            prop_assert!(encoded.text.matches(region.as_str()).count() <= 1);
        }
    }
}
