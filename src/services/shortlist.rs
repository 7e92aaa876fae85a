use crate::db::models::ResultRow;
use crate::services::ExamError;
use crate::store::ExamStore;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ShortlistSummary {
    pub(crate) qualified_count: i64,
    pub(crate) total_eligible: i64,
}

/// Re-runnable top-N selection over a round's ranked results. Clears every
/// qualified flag for the round and re-marks, so a repeat call (with the
/// same or a different N) fully overwrites the previous selection.
pub(crate) async fn apply(
    store: &dyn ExamStore,
    round_no: i32,
    top_n: i32,
) -> Result<ShortlistSummary, ExamError> {
    let results = store.results(round_no).await?;

    let mut eligible: Vec<&ResultRow> = results.iter().filter(|row| row.rank.is_some()).collect();
    eligible.sort_by_key(|row| row.rank);

    let selected: Vec<String> = eligible
        .iter()
        .take(top_n.max(0) as usize)
        .map(|row| row.candidate.clone())
        .collect();

    store.replace_qualified(round_no, &selected).await?;

    Ok(ShortlistSummary {
        qualified_count: selected.len() as i64,
        total_eligible: eligible.len() as i64,
    })
}
