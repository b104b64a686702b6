/*!
 * Interference Predicates
 *
 * Relations over (period, criticality) between a pivot task and another
 * member of the set. Priority follows rate-monotonic order: a period no
 * longer than the pivot's counts as higher priority.
 */

use super::TaskParams;

/// Predicate `(pivot, other) -> other belongs to the set`
pub type SetPredicate = fn(&TaskParams, &TaskParams) -> bool;

#[inline]
fn higher_prio(pivot: &TaskParams, other: &TaskParams) -> bool {
    other.period_ns <= pivot.period_ns
}

/// Preempts the pivot and outranks it in criticality
#[inline]
pub fn is_higher_prio_higher_crit(pivot: &TaskParams, other: &TaskParams) -> bool {
    higher_prio(pivot, other) && other.criticality > pivot.criticality
}

/// Lower priority but can still block the pivot once during a criticality raise
#[inline]
pub fn is_lower_prio_higher_crit(pivot: &TaskParams, other: &TaskParams) -> bool {
    !higher_prio(pivot, other) && other.criticality > pivot.criticality
}

#[inline]
pub fn is_higher_prio_same_crit(pivot: &TaskParams, other: &TaskParams) -> bool {
    higher_prio(pivot, other) && other.criticality == pivot.criticality
}

/// Preempts the pivot only until the pivot's zero-slack instant
#[inline]
pub fn is_higher_prio_lower_crit(pivot: &TaskParams, other: &TaskParams) -> bool {
    higher_prio(pivot, other) && other.criticality < pivot.criticality
}

/// Members of `set` other than `pivot` (by id) satisfying `pred`
pub fn members_in_set<'a, P>(
    set: &'a [TaskParams],
    pivot: &'a TaskParams,
    pred: P,
) -> impl Iterator<Item = &'a TaskParams> + 'a
where
    P: Fn(&TaskParams, &TaskParams) -> bool + 'a,
{
    set.iter()
        .filter(move |other| other.id != pivot.id && pred(pivot, other))
}
