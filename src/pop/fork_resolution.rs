/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! PoP scoring of two competing chains.
//!
//! Both chains are cut at their fork point and split into keystone periods. For every keystone
//! period, the *keystone context* of a chain is the height of the earliest block on the protecting
//! tree's active chain that carries an endorsement of the keystone (or of one of the blocks that
//! connect it to the next keystone), where the endorsement itself is carried by the same chain.
//!
//! Chains are compared period by period: for each period, the chain whose publication landed
//! earlier gets the higher weight from the lookup table. A chain that has no keystone in a period
//! where the other one does, or whose publications drift further apart than the finality delay,
//! falls *outside finality* and scores nothing more.

use crate::{
    block_tree::{chain::Chain, BaseBlockTree},
    keystone,
    params::PopParams,
    types::{block::BlockHeader, data_types::BlockHeight},
};

/// Publication height of a keystone nothing on the protecting chain endorses.
pub const NO_ENDORSEMENT: i64 = i32::MAX as i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeystoneContext {
    pub block_height: BlockHeight,
    /// Height of the earliest protecting block that publishes the keystone, or [`NO_ENDORSEMENT`].
    pub first_block_publication_height: i64,
}

/// Keystone contexts of one chain slice, from the first keystone above its fork point to the last
/// keystone at or below its tip.
#[derive(Clone, Debug)]
pub struct PublicationView {
    keystone_interval: u32,
    first_keystone: u32,
    last_keystone: u32,
    contexts: Vec<KeystoneContext>,
}

impl PublicationView {
    /// Compute the view of `chain`, a slice that starts at the fork point.
    ///
    /// Endorsements only count if the protecting tree `ing` has their block of proof on its active
    /// chain.
    pub fn new<H, G>(
        ed: &BaseBlockTree<H>,
        chain: &Chain<H>,
        ing: &BaseBlockTree<G>,
        pop: &PopParams,
    ) -> PublicationView
    where
        H: BlockHeader,
        G: BlockHeader<Hash = H::ProtectingHash>,
    {
        let keystone_interval = pop.keystone_interval;
        let tip_height = match chain.chain_height() {
            Some(height) => height.int(),
            None => {
                return PublicationView {
                    keystone_interval,
                    first_keystone: 1,
                    last_keystone: 0,
                    contexts: Vec::new(),
                }
            }
        };
        let first_keystone =
            keystone::first_keystone_after(chain.start_height().int(), keystone_interval);
        let last_keystone = keystone::highest_keystone_at_or_before(tip_height, keystone_interval);

        let mut contexts = Vec::new();
        let mut keystone_height = first_keystone;
        while keystone_height <= last_keystone {
            contexts.push(keystone_context(
                keystone_height,
                tip_height,
                ed,
                chain,
                ing,
                pop,
            ));
            keystone_height += keystone_interval;
        }

        PublicationView {
            keystone_interval,
            first_keystone,
            last_keystone,
            contexts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first_keystone > self.last_keystone
    }

    pub fn first_keystone(&self) -> u32 {
        self.first_keystone
    }

    pub fn last_keystone(&self) -> u32 {
        self.last_keystone
    }

    /// The context of the keystone at `height`, or `None` if it is outside the view.
    pub fn keystone(&self, height: u32) -> Option<&KeystoneContext> {
        if self.is_empty() || height < self.first_keystone || height > self.last_keystone {
            return None;
        }
        self.contexts
            .get(((height - self.first_keystone) / self.keystone_interval) as usize)
    }
}

fn keystone_context<H, G>(
    keystone_height: u32,
    tip_height: u32,
    ed: &BaseBlockTree<H>,
    chain: &Chain<H>,
    ing: &BaseBlockTree<G>,
    pop: &PopParams,
) -> KeystoneContext
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
{
    let highest_endorsed = std::cmp::min(
        keystone::highest_block_which_connects_keystone_to_previous(
            keystone_height,
            pop.keystone_interval,
        ),
        tip_height,
    );
    let keystone_timestamp = chain
        .get(BlockHeight::new(keystone_height))
        .and_then(|hash| ed.get_block_index(&hash))
        .map(|index| index.timestamp())
        .expect("a keystone inside the publication view must be on the chain");

    let protecting_chain = ing.get_best_chain();
    let mut earliest = NO_ENDORSEMENT;
    for height in keystone_height..=highest_endorsed {
        let endorsed = match chain
            .get(BlockHeight::new(height))
            .and_then(|hash| ed.get_block_index(&hash))
        {
            Some(endorsed) => endorsed,
            None => continue,
        };

        for key in endorsed.endorsed_by() {
            let containing = match ed.get_block_index(&key.containing_hash) {
                Some(containing) if chain.contains(containing) => containing,
                _ => continue,
            };
            let block_of_proof = match containing
                .containing_endorsements()
                .get(&key.id)
                .and_then(|endorsement| ing.get_block_index(&endorsement.block_of_proof))
            {
                Some(block_of_proof) if protecting_chain.contains(block_of_proof) => block_of_proof,
                _ => continue,
            };

            let publication = block_of_proof.height().int() as i64;
            if publication >= earliest {
                continue;
            }
            if !pop.enable_time_adjustment || keystone_timestamp < block_of_proof.timestamp() {
                earliest = publication;
                continue;
            }
            // The keystone can not have been published before it was mined: move the publication
            // forward to the first protecting block that is newer than the keystone.
            let mut adjusted = block_of_proof.height() + 1;
            while let Some(index) = protecting_chain
                .get(adjusted)
                .and_then(|hash| ing.get_block_index(&hash))
            {
                if keystone_timestamp < index.timestamp() {
                    earliest = std::cmp::min(earliest, adjusted.int() as i64);
                    break;
                }
                adjusted += 1;
            }
        }
    }

    KeystoneContext {
        block_height: BlockHeight::new(keystone_height),
        first_block_publication_height: earliest,
    }
}

/// Whether a publication at `publication` is more than the finality delay after `base`.
pub fn publication_violates_finality(publication: i64, base: i64, finality_delay: u32) -> bool {
    publication - base > finality_delay as i64
}

/// Weight of a publication `relative_block` protecting blocks after the earliest competing one.
pub fn score_from_relative_block(relative_block: i64, lookup_table: &[u32]) -> i64 {
    if relative_block < 0 || relative_block as usize >= lookup_table.len() {
        return 0;
    }
    lookup_table[relative_block as usize] as i64
}

/// Compare the PoP scores of the views `a` and `b` of two chains that share a fork point.
///
/// Returns a positive number if `a` is better, a negative number if `b` is better, and 0 if they are
/// equal.
pub fn compare_pop_score(a: &PublicationView, b: &PublicationView, pop: &PopParams) -> i64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 0,
        (true, false) => return -1,
        (false, true) => return 1,
        (false, false) => {}
    }

    let keystone_interval = pop.keystone_interval;
    let table = &pop.fork_resolution_lookup_table;
    let first_weight = table.first().copied().unwrap_or(0) as i64;
    let earliest_keystone = std::cmp::min(a.first_keystone(), b.first_keystone());
    let latest_keystone = std::cmp::max(a.last_keystone(), b.last_keystone());

    let mut a_outside_finality = false;
    let mut b_outside_finality = false;
    let mut a_score: i64 = 0;
    let mut b_score: i64 = 0;
    let mut previous_publication_a = NO_ENDORSEMENT;
    let mut previous_publication_b = NO_ENDORSEMENT;

    let mut keystone_height = earliest_keystone;
    while keystone_height <= latest_keystone {
        let mut a_context = if a_outside_finality { None } else { a.keystone(keystone_height) };
        let mut b_context = if b_outside_finality { None } else { b.keystone(keystone_height) };
        keystone_height += keystone_interval;

        let publication_a = a_context.map_or(NO_ENDORSEMENT, |c| c.first_block_publication_height);
        let publication_b = b_context.map_or(NO_ENDORSEMENT, |c| c.first_block_publication_height);

        // Right after a gap the previous publication is NO_ENDORSEMENT, which never violates.
        if a_context.is_some()
            && publication_violates_finality(publication_a, previous_publication_a, pop.finality_delay)
        {
            log::trace!("chain A is outside finality: adjacent keystone publications are too far apart");
            a_outside_finality = true;
            a_context = None;
        }
        previous_publication_a = publication_a;

        if b_context.is_some()
            && publication_violates_finality(publication_b, previous_publication_b, pop.finality_delay)
        {
            log::trace!("chain B is outside finality: adjacent keystone publications are too far apart");
            b_outside_finality = true;
            b_context = None;
        }
        previous_publication_b = publication_b;

        match (a_context, b_context) {
            (None, None) => {
                if a_outside_finality && b_outside_finality {
                    break;
                }
            }
            (None, Some(_)) => {
                b_score += first_weight;
                a_outside_finality = true;
                if b_score > a_score {
                    break;
                }
            }
            (Some(_), None) => {
                a_score += first_weight;
                b_outside_finality = true;
                if a_score > b_score {
                    break;
                }
            }
            (Some(_), Some(_)) => {
                let earliest = std::cmp::min(publication_a, publication_b);
                a_score += score_from_relative_block(publication_a - earliest, table);
                b_score += score_from_relative_block(publication_b - earliest, table);

                if publication_violates_finality(publication_a, publication_b, pop.finality_delay) {
                    log::trace!("chain A is outside finality: far behind chain B");
                    a_outside_finality = true;
                }
                if publication_violates_finality(publication_b, publication_a, pop.finality_delay) {
                    log::trace!("chain B is outside finality: far behind chain A");
                    b_outside_finality = true;
                }
            }
        }
    }

    log::debug!("PoP scores: chain A {}, chain B {}", a_score, b_score);
    a_score - b_score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PopParams {
        PopParams::builder()
            .keystone_interval(5)
            .finality_delay(10)
            .endorsement_settlement_interval(50)
            .build()
    }

    fn view(first_keystone: u32, publications: &[i64]) -> PublicationView {
        let contexts: Vec<KeystoneContext> = publications
            .iter()
            .enumerate()
            .map(|(i, publication)| KeystoneContext {
                block_height: BlockHeight::new(first_keystone + 5 * i as u32),
                first_block_publication_height: *publication,
            })
            .collect();
        PublicationView {
            keystone_interval: 5,
            first_keystone,
            last_keystone: first_keystone + 5 * contexts.len() as u32 - 5,
            contexts,
        }
    }

    fn empty_view() -> PublicationView {
        PublicationView {
            keystone_interval: 5,
            first_keystone: 5,
            last_keystone: 0,
            contexts: Vec::new(),
        }
    }

    #[test]
    fn empty_views() {
        let pop = params();
        assert_eq!(compare_pop_score(&empty_view(), &empty_view(), &pop), 0);
        assert!(compare_pop_score(&empty_view(), &view(5, &[100]), &pop) < 0);
        assert!(compare_pop_score(&view(5, &[100]), &empty_view(), &pop) > 0);
    }

    #[test]
    fn earlier_publication_wins() {
        let pop = params();
        // Both chains publish every keystone; A always two protecting blocks earlier.
        let a = view(5, &[100, 101, 102]);
        let b = view(5, &[102, 103, 104]);
        let score = compare_pop_score(&a, &b, &pop);
        assert_eq!(score, 3 * (100 - 95));
        assert_eq!(compare_pop_score(&b, &a, &pop), -score);
        assert_eq!(compare_pop_score(&a, &a, &pop), 0);
    }

    #[test]
    fn missing_keystone_falls_outside_finality() {
        let pop = params();
        // B has one keystone fewer than A.
        let a = view(5, &[100, 101, 102]);
        let b = view(5, &[100, 101]);
        assert_eq!(compare_pop_score(&a, &b, &pop), 100);
    }

    #[test]
    fn publication_gap_beyond_finality_delay() {
        let pop = params();
        // A's second keystone lands 50 blocks after its first: A drops out and B takes the period.
        let a = view(5, &[100, 150]);
        let b = view(5, &[100, 105]);
        assert!(compare_pop_score(&a, &b, &pop) < 0);
    }

    #[test]
    fn unendorsed_keystones_score_equally() {
        let pop = params();
        let a = view(5, &[NO_ENDORSEMENT]);
        let b = view(5, &[NO_ENDORSEMENT]);
        assert_eq!(compare_pop_score(&a, &b, &pop), 0);
    }

    #[test]
    fn lookup_table_bounds() {
        let table = [100, 50];
        assert_eq!(score_from_relative_block(-1, &table), 0);
        assert_eq!(score_from_relative_block(0, &table), 100);
        assert_eq!(score_from_relative_block(1, &table), 50);
        assert_eq!(score_from_relative_block(2, &table), 0);
        assert!(publication_violates_finality(111, 100, 10));
        assert!(!publication_violates_finality(110, 100, 10));
    }
}
