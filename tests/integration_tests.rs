use chrono::NaiveDate;
use pickup_layers::config::PipelineConfig;
use pickup_layers::error::JobError;
use pickup_layers::grid::GridCell;
use pickup_layers::layers::hot_grids::{self, label_hot_grids};
use pickup_layers::layers::{JobContext, JobKind};
use pickup_layers::layers::pickup_grid::{self, CellCount, grid_stats};
use pickup_layers::layers::road_popularity::{self, WayFrequency, name_roads, tag_ways};
use pickup_layers::runner::run_job;
use pickup_layers::store::{Cell, MemoryStore};
use sqlx::postgres::PgPoolOptions;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
}

fn saturday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
}

/// Counts points per grid cell the way the summary query groups them.
fn count_cells(points: &[(f64, f64, NaiveDate, u32)]) -> Vec<CellCount> {
    let mut counts: BTreeMap<GridCell, i64> = BTreeMap::new();
    for &(lon, lat, date, hour) in points {
        *counts.entry(GridCell::locate(lon, lat, date, hour)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(cell, pickup_count)| CellCount {
            cell_x: cell.x,
            cell_y: cell.y,
            stat_date: cell.date,
            stat_hour: cell.hour as i32,
            pickup_count,
        })
        .collect()
}

/// Rows of the hot grid table for one (workday, hour), as (grid id, count).
fn hotspot_rows(store: &MemoryStore, workday: bool, hour: i32) -> Vec<(String, i64)> {
    store
        .rows(hot_grids::TABLE.name)
        .unwrap_or_default()
        .into_iter()
        .filter(|row| row[6] == Cell::Bool(workday) && row[5] == Cell::Int(hour))
        .map(|row| match (&row[0], &row[2]) {
            (Cell::Text(id), Cell::BigInt(count)) => (id.clone(), *count),
            other => panic!("unexpected cells {other:?}"),
        })
        .collect()
}

async fn rebuild_grids(store: &MemoryStore, points: &[(f64, f64, NaiveDate, u32)]) {
    let cells = count_cells(points);
    let stats = grid_stats(cells);

    run_job(store, pickup_grid::NAME, &pickup_grid::TABLE, 100, || {
        let stats = stats.clone();
        async move { Ok(stats) }
    })
    .await
    .unwrap();

    run_job(store, hot_grids::NAME, &hot_grids::TABLE, 100, || async move {
        Ok(label_hot_grids(stats).1)
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_weekday_and_weekend_pickups_split_into_hotspots() {
    let store = MemoryStore::new();
    let points = [
        (126.6771, 45.7581, tuesday(), 8),
        (126.6852, 45.7613, tuesday(), 8),
        (126.6402, 45.7302, saturday(), 8),
    ];
    rebuild_grids(&store, &points).await;

    assert_eq!(store.row_count(pickup_grid::TABLE.name), 3);

    let workday = hotspot_rows(&store, true, 8);
    assert_eq!(workday.len(), 2);
    assert_eq!(workday.iter().map(|(_, n)| n).sum::<i64>(), 2);

    let weekend = hotspot_rows(&store, false, 8);
    assert_eq!(weekend.len(), 1);
    assert_eq!(weekend[0].1, 1);

    assert!(hotspot_rows(&store, true, 9).is_empty());
}

#[tokio::test]
async fn test_nearby_pickups_share_one_grid_cell() {
    let store = MemoryStore::new();
    let points = [
        (126.67712, 45.75811, tuesday(), 8),
        (126.67788, 45.75893, tuesday(), 8),
        (126.6402, 45.7302, saturday(), 8),
    ];
    rebuild_grids(&store, &points).await;

    let workday = hotspot_rows(&store, true, 8);
    assert_eq!(workday.len(), 1);
    assert_eq!(workday[0].1, 2);
    assert_eq!(
        workday[0].0,
        GridCell::locate(126.6775, 45.7585, tuesday(), 8).id()
    );
}

#[tokio::test]
async fn test_rebuild_is_idempotent_apart_from_stamps() {
    let store = MemoryStore::new();
    let points = [
        (126.6771, 45.7581, tuesday(), 8),
        (126.6852, 45.7613, tuesday(), 9),
        (126.6402, 45.7302, saturday(), 22),
    ];

    let without_stamp = |store: &MemoryStore| -> Vec<Vec<Cell>> {
        store
            .rows(hot_grids::TABLE.name)
            .unwrap()
            .into_iter()
            .map(|mut row| {
                assert!(matches!(row.pop(), Some(Cell::Timestamp(_))));
                row
            })
            .collect()
    };

    rebuild_grids(&store, &points).await;
    let first = without_stamp(&store);
    rebuild_grids(&store, &points).await;
    let second = without_stamp(&store);

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_road_quartiles_persist_with_tags() {
    let store = MemoryStore::new();
    let frequencies = vec![
        WayFrequency { way_id: 11, frequency: 20 },
        WayFrequency { way_id: 12, frequency: 40 },
        WayFrequency { way_id: 13, frequency: 10 },
        WayFrequency { way_id: 14, frequency: 30 },
    ];

    let report = run_job(
        &store,
        road_popularity::NAME,
        &road_popularity::TABLE,
        100,
        || async move { Ok(tag_ways(frequencies)) },
    )
    .await
    .unwrap();
    assert_eq!(report.rows, 4);

    let rows = store.rows(road_popularity::TABLE.name).unwrap();
    let tags: Vec<(Cell, Cell)> = rows
        .into_iter()
        .map(|row| (row[0].clone(), row[2].clone()))
        .collect();
    assert_eq!(
        tags,
        vec![
            (Cell::BigInt(12), Cell::Text("very_hot".to_string())),
            (Cell::BigInt(14), Cell::Text("very_hot".to_string())),
            (Cell::BigInt(11), Cell::Text("hot".to_string())),
            (Cell::BigInt(13), Cell::Text("normal".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_unnamed_roads_never_reach_named_table() {
    let store = MemoryStore::new();
    let tagged = tag_ways(vec![
        WayFrequency { way_id: 1, frequency: 9 },
        WayFrequency { way_id: 2, frequency: 7 },
        WayFrequency { way_id: 3, frequency: 5 },
    ]);
    let names = HashMap::from([(2, "Xidazhi St".to_string())]);

    let report = run_job(
        &store,
        road_popularity::NAMED_NAME,
        &road_popularity::NAMED_TABLE,
        100,
        || async move { Ok(name_roads(tagged, &names)) },
    )
    .await
    .unwrap();

    assert_eq!(report.rows, 1);
    assert_eq!(
        store.rows(road_popularity::NAMED_TABLE.name).unwrap()[0][0],
        Cell::Text("Xidazhi St".to_string())
    );
}

#[tokio::test]
async fn test_failed_batch_reports_rows_already_written() {
    let store = MemoryStore::failing_on_batch(1);
    let stats = grid_stats(count_cells(&[
        (126.6015, 45.7015, tuesday(), 8),
        (126.6025, 45.7025, tuesday(), 8),
        (126.6035, 45.7035, tuesday(), 8),
    ]));

    let err = run_job(&store, pickup_grid::NAME, &pickup_grid::TABLE, 2, || async move {
        Ok(stats)
    })
    .await
    .unwrap_err();

    match err {
        JobError::Write { table, written, .. } => {
            assert_eq!(table, "dws_pickup_grid_stat");
            assert_eq!(written, 2);
        }
        other => panic!("expected write error, got {other:?}"),
    }
    assert_eq!(store.row_count(pickup_grid::TABLE.name), 2);
}

#[tokio::test]
async fn test_dry_run_hot_grids_read_this_rounds_summary() {
    let store = Arc::new(MemoryStore::new());
    let stats = grid_stats(count_cells(&[
        (126.6771, 45.7581, tuesday(), 8),
        (126.6852, 45.7613, tuesday(), 8),
        (126.6402, 45.7302, saturday(), 8),
    ]));
    run_job(store.as_ref(), pickup_grid::NAME, &pickup_grid::TABLE, 100, || async move {
        Ok(stats)
    })
    .await
    .unwrap();

    // Never connected: the hot grid job must not touch the database here.
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/pickup_layers_unreachable")
        .unwrap();
    let ctx = JobContext {
        pool,
        store: store.clone(),
        config: Arc::new(PipelineConfig::default()),
    };

    let report = JobKind::HotGrids.run(&ctx).await.unwrap();
    assert_eq!(report.rows, 3);
    assert_eq!(hotspot_rows(&store, true, 8).len(), 2);
    assert_eq!(hotspot_rows(&store, false, 8).len(), 1);
}
