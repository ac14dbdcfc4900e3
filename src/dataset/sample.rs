//! Seeded uniform row sampling

use super::Table;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Draw `n` distinct rows uniformly at random with a fixed seed.
///
/// A table with `n` rows or fewer is returned whole, so small tables are
/// compared in full instead of failing the draw.
pub fn sample_rows(table: &Table, n: usize, seed: u64) -> Table {
    if table.len() <= n {
        debug!(rows = table.len(), requested = n, "Table smaller than sample size, using all rows");
        return table.clone();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = rand::seq::index::sample(&mut rng, table.len(), n).into_vec();
    indices.sort_unstable();
    table.select_rows(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Table {
        let rows = (0..n).map(|i| vec![i.to_string()]).collect();
        Table::from_rows(vec!["id".to_string()], rows).unwrap()
    }

    #[test]
    fn test_small_table_is_used_whole() {
        let table = numbered(10);
        assert_eq!(sample_rows(&table, 1000, 42), table);
        assert_eq!(sample_rows(&table, 10, 42), table);
    }

    #[test]
    fn test_sample_is_deterministic_for_a_seed() {
        let table = numbered(5000);
        let a = sample_rows(&table, 1000, 42);
        let b = sample_rows(&table, 1000, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1000);
    }

    #[test]
    fn test_sample_rows_are_distinct() {
        let table = numbered(300);
        let sample = sample_rows(&table, 100, 7);
        let ids: std::collections::HashSet<_> = sample.column("id").unwrap().into_iter().collect();
        assert_eq!(ids.len(), 100);
    }
}
