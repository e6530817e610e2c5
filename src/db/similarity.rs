//! Threshold search over a paginated, best-first result sequence.

use crate::error::StoreResult;
use crate::model::EmbeddingRecord;

/// Pull pages from `fetch_page(offset, limit)` until a record scores below
/// `min_score`, a short page arrives, or the sequence ends.
///
/// Pages must be in non-increasing score order across the whole sequence, so
/// the first record under the threshold proves every later one is too and no
/// further page is requested. The query record itself is never returned.
pub fn collect_above_threshold<F>(
    query_id: &str,
    min_score: f32,
    batch_size: usize,
    mut fetch_page: F,
) -> StoreResult<Vec<EmbeddingRecord>>
where
    F: FnMut(usize, usize) -> StoreResult<Vec<EmbeddingRecord>>,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(offset, batch_size)?;
        let page_len = page.len();

        for record in page {
            if record.id == query_id {
                continue;
            }
            let score = record.score.unwrap_or(f32::NEG_INFINITY);
            if score < min_score {
                return Ok(results);
            }
            results.push(record);
        }

        if page_len < batch_size {
            return Ok(results);
        }
        offset += batch_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn scored(id: &str, score: f32) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.to_string(),
            score: Some(score),
            ..Default::default()
        }
    }

    /// Twenty records whose scores strictly decrease with offset; "q" sits at
    /// the top the way a self-match does.
    fn sequence() -> Vec<EmbeddingRecord> {
        let mut all = vec![scored("q", 1.0)];
        for i in 0..19 {
            all.push(scored(&format!("r{i:02}"), 0.95 - i as f32 * 0.05));
        }
        all
    }

    #[test]
    fn test_stops_at_first_page_with_low_score() {
        let all = sequence();
        let pages = Cell::new(0);
        let found = collect_above_threshold("q", 0.62, 4, |offset, limit| {
            pages.set(pages.get() + 1);
            Ok(all.iter().skip(offset).take(limit).cloned().collect())
        })
        .unwrap();

        // r00..r06 score 0.95..0.65; r07 scores 0.60 and opens page 3.
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r00", "r01", "r02", "r03", "r04", "r05", "r06"]);
        assert_eq!(pages.get(), 3);
    }

    #[test]
    fn test_excludes_query_record() {
        let all = sequence();
        let found = collect_above_threshold("q", -1.0, 5, |offset, limit| {
            Ok(all.iter().skip(offset).take(limit).cloned().collect())
        })
        .unwrap();
        assert_eq!(found.len(), 19);
        assert!(found.iter().all(|r| r.id != "q"));
    }

    #[test]
    fn test_exhausted_sequence_ends_on_short_page() {
        let all = sequence();
        let pages = Cell::new(0);
        collect_above_threshold("q", -1.0, 8, |offset, limit| {
            pages.set(pages.get() + 1);
            Ok(all.iter().skip(offset).take(limit).cloned().collect())
        })
        .unwrap();
        // 20 records in pages of 8: 8, 8, 4.
        assert_eq!(pages.get(), 3);
    }

    #[test]
    fn test_page_error_propagates() {
        let err = collect_above_threshold("q", 0.0, 2, |_, _| {
            Err(crate::error::StoreError::Connectivity("down".into()))
        });
        assert!(err.is_err());
    }
}
