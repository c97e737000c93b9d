//! End-to-end pipeline tests: CSV file in, processed rows out.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metl::sink::RowSink;
use metl::source::{CsvOptions, CsvSource};
use metl::{ColumnRule, ColumnRules, ColumnType, FailurePolicy, PipelineEngine, ProcessedRow};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct CollectSink {
    rows: Arc<Mutex<Vec<ProcessedRow>>>,
}

#[async_trait]
impl RowSink for CollectSink {
    async fn open(&mut self) -> metl::Result<()> {
        Ok(())
    }

    async fn write(&mut self, row: ProcessedRow) -> metl::Result<()> {
        self.rows.lock().unwrap().push(row);
        Ok(())
    }

    async fn close(&mut self) -> metl::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collect"
    }
}

fn write_csv(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("input.csv");
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discard_and_rename_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(
        &dir,
        "A,B,C,D,E\n1,b1,c1,d1,e1\n2,b2,c2,d2,e2\n3,b3,c3,d3,e3\n4,b4,c4,d4,e4\n5,b5,c5,d5,e5\n",
    );

    let rules = ColumnRules::new(
        vec![
            ColumnRule::new("D", ColumnType::String).discarded(),
            ColumnRule::new("A", ColumnType::Int).mapped_to("INT"),
        ],
        false,
    )
    .unwrap();
    let sink = CollectSink::default();
    let source = CsvSource::new(CsvOptions { skip: 0, header: true });

    let summary = PipelineEngine::new("e2e", rules, 4)
        .run(Box::new(source), input, Box::new(sink.clone()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.rows, 5);
    assert_eq!(summary.accepted, 5);
    assert_eq!(summary.rejected, 0);

    let rows = sink.rows.lock().unwrap();
    assert_eq!(rows.len(), 5);
    let expected: BTreeSet<&str> = ["INT", "B", "C", "E"].into_iter().collect();
    for row in rows.iter() {
        assert_eq!(row.keys().collect::<BTreeSet<_>>(), expected);
    }
    let ints: BTreeSet<&str> = rows.iter().filter_map(|r| r.get("INT")).collect();
    assert_eq!(ints, ["1", "2", "3", "4", "5"].into_iter().collect());
}

#[tokio::test]
async fn test_preamble_rejects_and_transforms() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(
        &dir,
        "exported 2024-01-01\nid,active,code\n1,T,ab\nnope,1,cd\n3,maybe,ef\n4,0,g\n",
    );

    let rules = ColumnRules::new(
        vec![
            ColumnRule::new("id", ColumnType::Int).with_failure(FailurePolicy::Reject),
            ColumnRule::new("active", ColumnType::Bool),
            ColumnRule::new("code", ColumnType::String)
                .with_length(2)
                .with_failure(FailurePolicy::Reject)
                .with_transform("{{toUpper this}}"),
        ],
        false,
    )
    .unwrap();
    let sink = CollectSink::default();
    let source = CsvSource::new(CsvOptions { skip: 1, header: true });

    let summary = PipelineEngine::new("mixed", rules, 2)
        .run(Box::new(source), input, Box::new(sink.clone()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!((summary.rows, summary.accepted, summary.rejected), (4, 2, 2));

    let mut rows = sink.rows.lock().unwrap().clone();
    rows.sort_by(|a, b| a.get("id").cmp(&b.get("id")));
    assert_eq!(rows[0].get("active"), Some("true"));
    assert_eq!(rows[0].get("code"), Some("AB"));
    // bool failure under keep drops only that field
    assert_eq!(rows[1].get("id"), Some("3"));
    assert_eq!(rows[1].get("active"), None);
    assert_eq!(rows[1].get("code"), Some("EF"));
}
