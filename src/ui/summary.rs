//! Flat `% self  % total  name` table over a finished call-path tree —
//! the CPU/memory-profile-mode counterpart to `ui::flamegraph`'s rendering
//! of sample-mode data. Unlike the sampled case there is no trace count to
//! divide by: every row's percentage is against the root's inclusive
//! self-time, exactly the denominator the exporter uses for `cpu_cost_percent`.

use std::io;

use anyhow::Result;

use crate::tree::{CallPathTree, NodeId};

struct Row {
    name: String,
    self_cost: u64,
    total_cost: u64,
}

pub struct Stats {
    rows: Vec<Row>,
    session_total: u64,
}

impl Stats {
    const HEADER: &'static str = "% self  % total  name";

    /// Walks every node but the synthetic root, pairing each node's own
    /// `real_cost` with its inclusive total (its own cost plus every
    /// descendant's).
    pub fn from_tree(tree: &CallPathTree) -> Self {
        let mut rows = Vec::new();
        let session_total = tree.totals(tree.root()).real_cost;
        Self::collect(tree, tree.root(), &mut rows);
        Stats { rows, session_total }
    }

    fn collect(tree: &CallPathTree, id: NodeId, rows: &mut Vec<Row>) {
        for child in tree.children(id) {
            let node = tree.node(child);
            rows.push(Row {
                name: format!(
                    "{} - {}:{}",
                    node.name.as_deref().unwrap_or(""),
                    node.source.as_deref().unwrap_or(""),
                    node.line
                ),
                self_cost: node.real_cost,
                total_cost: tree.totals(child).real_cost,
            });
            Self::collect(tree, child, rows);
        }
    }

    pub fn write(&self, w: &mut dyn io::Write) -> Result<()> {
        self.write_counts(w, None, None)
    }

    pub fn write_top_n(&self, w: &mut dyn io::Write, n: usize, truncate: Option<usize>) -> Result<()> {
        self.write_counts(w, Some(n), truncate)
    }

    fn write_counts(&self, w: &mut dyn io::Write, top: Option<usize>, truncate: Option<usize>) -> Result<()> {
        let top = top.unwrap_or(usize::from(u16::MAX));
        let truncate = truncate.unwrap_or(usize::from(u16::MAX));
        let mut sorted: Vec<&Row> = self.rows.iter().collect();
        sorted.sort_unstable_by(|a, b| {
            (b.self_cost, b.total_cost).cmp(&(a.self_cost, a.total_cost))
        });

        writeln!(w, "{}", Self::HEADER)?;
        if self.session_total == 0 {
            return Ok(());
        }
        for row in sorted.into_iter().take(top) {
            writeln!(
                w,
                "{:>6.2} {:>8.2}  {:.*}",
                100.0 * row.self_cost as f64 / self.session_total as f64,
                100.0 * row.total_cost as f64 / self.session_total as f64,
                truncate.saturating_sub(17),
                row.name
            )?;
        }
        Ok(())
    }
}
