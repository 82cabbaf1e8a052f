//! Per-photo rows of a triage job

use sift_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

use crate::grid::Coordinate;
use crate::models::{Pass, TriagePhoto};

const PHOTO_COLUMNS: &str = r#"
    job_id, sequence, original_filename, storage_path, content_hash, width, height,
    grid_index, grid_coordinate, fine_grid_index, fine_grid_coordinate,
    coarse_votes, fine_votes, selected_coarse, selected_fine, final_selected, final_rank,
    excluded, exclusion_reason
"#;

/// Insert ingested photos in one transaction
pub async fn insert_photos(pool: &SqlitePool, photos: &[TriagePhoto]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for photo in photos {
        sqlx::query(
            r#"
            INSERT INTO triage_photos (
                job_id, sequence, original_filename, storage_path, content_hash, width, height
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(photo.job_id.to_string())
        .bind(photo.sequence as i64)
        .bind(&photo.original_filename)
        .bind(photo.storage_path.to_string_lossy().as_ref())
        .bind(&photo.content_hash)
        .bind(photo.width as i64)
        .bind(photo.height as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove every photo of a job (re-ingest after an interrupted upload)
pub async fn delete_photos_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM triage_photos WHERE job_id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// All photos of a job in ingest order
pub async fn load_photos(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<TriagePhoto>> {
    sqlx::query(&format!(
        "SELECT {} FROM triage_photos WHERE job_id = ? ORDER BY sequence",
        PHOTO_COLUMNS
    ))
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?
    .iter()
    .map(photo_from_row)
    .collect()
}

/// Mark a photo excluded and bump the job's `photos_excluded`
///
/// Returns `false` when the photo was already excluded (counter unchanged).
pub async fn exclude_photo(
    pool: &SqlitePool,
    job_id: Uuid,
    sequence: u32,
    reason: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE triage_photos SET excluded = 1, exclusion_reason = ?
        WHERE job_id = ? AND sequence = ? AND excluded = 0
        "#,
    )
    .bind(reason)
    .bind(job_id.to_string())
    .bind(sequence as i64)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated > 0 {
        sqlx::query("UPDATE triage_jobs SET photos_excluded = photos_excluded + ? WHERE job_id = ?")
            .bind(updated as i64)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(updated > 0)
}

/// Record where each photo sits in a generated grid
pub async fn assign_grid_cells(
    pool: &SqlitePool,
    job_id: Uuid,
    pass: Pass,
    grid_index: u32,
    cells: &[(u32, Coordinate)],
) -> Result<()> {
    let sql = match pass {
        Pass::Coarse => {
            "UPDATE triage_photos SET grid_index = ?, grid_coordinate = ? WHERE job_id = ? AND sequence = ?"
        }
        Pass::Fine => {
            "UPDATE triage_photos SET fine_grid_index = ?, fine_grid_coordinate = ? WHERE job_id = ? AND sequence = ?"
        }
    };

    let mut tx = pool.begin().await?;
    for (sequence, coordinate) in cells {
        sqlx::query(sql)
            .bind(grid_index as i64)
            .bind(coordinate.to_string())
            .bind(job_id.to_string())
            .bind(*sequence as i64)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Reset a pass's placement and selection columns before its grids are rebuilt
pub async fn clear_pass_assignments(pool: &SqlitePool, job_id: Uuid, pass: Pass) -> Result<()> {
    let sql = match pass {
        Pass::Coarse => {
            r#"
            UPDATE triage_photos
            SET grid_index = NULL, grid_coordinate = NULL, selected_coarse = 0, coarse_votes = 0
            WHERE job_id = ?
            "#
        }
        Pass::Fine => {
            r#"
            UPDATE triage_photos
            SET fine_grid_index = NULL, fine_grid_coordinate = NULL, selected_fine = 0, fine_votes = 0
            WHERE job_id = ?
            "#
        }
    };

    sqlx::query(sql).bind(job_id.to_string()).execute(pool).await?;
    Ok(())
}

/// Store the final ranked selection and the job's `final_selected` count
///
/// `ranked_sequences[0]` gets rank 1.
pub async fn set_final_selection(
    pool: &SqlitePool,
    job_id: Uuid,
    ranked_sequences: &[u32],
) -> Result<()> {
    let job_id_str = job_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE triage_photos SET final_selected = 0, final_rank = NULL WHERE job_id = ?")
        .bind(&job_id_str)
        .execute(&mut *tx)
        .await?;

    for (position, sequence) in ranked_sequences.iter().enumerate() {
        sqlx::query(
            "UPDATE triage_photos SET final_selected = 1, final_rank = ? WHERE job_id = ? AND sequence = ?",
        )
        .bind(position as i64 + 1)
        .bind(&job_id_str)
        .bind(*sequence as i64)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE triage_jobs SET final_selected = ? WHERE job_id = ?")
        .bind(ranked_sequences.len() as i64)
        .bind(&job_id_str)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Final selection ordered by rank
pub async fn load_final_selection(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<TriagePhoto>> {
    sqlx::query(&format!(
        "SELECT {} FROM triage_photos WHERE job_id = ? AND final_selected = 1 ORDER BY final_rank",
        PHOTO_COLUMNS
    ))
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?
    .iter()
    .map(photo_from_row)
    .collect()
}

fn photo_from_row(row: &SqliteRow) -> Result<TriagePhoto> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Invalid job id {}: {}", job_id, e)))?;
    let storage_path: String = row.get("storage_path");

    Ok(TriagePhoto {
        job_id,
        sequence: row.get::<i64, _>("sequence") as u32,
        original_filename: row.get("original_filename"),
        storage_path: PathBuf::from(storage_path),
        content_hash: row.get("content_hash"),
        width: row.get::<i64, _>("width") as u32,
        height: row.get::<i64, _>("height") as u32,
        grid_index: row.get::<Option<i64>, _>("grid_index").map(|v| v as u32),
        grid_coordinate: row.get("grid_coordinate"),
        fine_grid_index: row.get::<Option<i64>, _>("fine_grid_index").map(|v| v as u32),
        fine_grid_coordinate: row.get("fine_grid_coordinate"),
        coarse_votes: row.get::<i64, _>("coarse_votes") as u32,
        fine_votes: row.get::<i64, _>("fine_votes") as u32,
        selected_coarse: row.get("selected_coarse"),
        selected_fine: row.get("selected_fine"),
        final_selected: row.get("final_selected"),
        final_rank: row.get::<Option<i64>, _>("final_rank").map(|v| v as u32),
        excluded: row.get("excluded"),
        exclusion_reason: row.get("exclusion_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::jobs;
    use crate::models::{Criteria, ImageReference, TriageJob, TriageTarget};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (SqlitePool, Uuid) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();

        let job = TriageJob::new(
            TriageTarget::Count(2),
            Criteria::Standout,
            1,
            vec![],
            chrono::Duration::hours(1),
        )
        .unwrap();
        jobs::save_job(&pool, &job, 1000).await.unwrap();

        let photos: Vec<TriagePhoto> = (0..4)
            .map(|i| {
                let image = ImageReference::new(format!("hash{}", i), format!("/p/{}.jpg", i), 10, 10);
                TriagePhoto::from_image(job.job_id, i, &image)
            })
            .collect();
        insert_photos(&pool, &photos).await.unwrap();

        (pool, job.job_id)
    }

    #[tokio::test]
    async fn test_photos_load_in_sequence_order() {
        let (pool, job_id) = setup().await;
        let photos = load_photos(&pool, job_id).await.unwrap();
        assert_eq!(photos.len(), 4);
        assert_eq!(photos[2].content_hash, "hash2");
        assert_eq!(photos[2].original_filename, "2.jpg");
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let (pool, job_id) = setup().await;
        let dup = TriagePhoto::from_image(
            job_id,
            9,
            &ImageReference::new("hash0", "/p/copy.jpg", 10, 10),
        );
        assert!(insert_photos(&pool, &[dup]).await.is_err());
    }

    #[tokio::test]
    async fn test_exclusion_counts_once() {
        let (pool, job_id) = setup().await;
        assert!(exclude_photo(&pool, job_id, 1, "decode failed").await.unwrap());
        assert!(!exclude_photo(&pool, job_id, 1, "decode failed").await.unwrap());

        let job = jobs::require_job(&pool, job_id).await.unwrap();
        assert_eq!(job.photos_excluded, 1);
    }

    #[tokio::test]
    async fn test_grid_assignment_and_final_selection() {
        let (pool, job_id) = setup().await;
        let a1: Coordinate = "A1".parse().unwrap();
        let a2: Coordinate = "A2".parse().unwrap();
        assign_grid_cells(&pool, job_id, Pass::Coarse, 0, &[(0, a1), (1, a2)])
            .await
            .unwrap();

        set_final_selection(&pool, job_id, &[3, 1]).await.unwrap();

        let selection = load_final_selection(&pool, job_id).await.unwrap();
        let order: Vec<(u32, Option<u32>)> =
            selection.iter().map(|p| (p.sequence, p.final_rank)).collect();
        assert_eq!(order, vec![(3, Some(1)), (1, Some(2))]);
        assert_eq!(selection[1].grid_coordinate.as_deref(), Some("A2"));

        let job = jobs::require_job(&pool, job_id).await.unwrap();
        assert_eq!(job.final_selected, 2);
    }

    #[tokio::test]
    async fn test_photos_cascade_with_job() {
        let (pool, job_id) = setup().await;
        sqlx::query("DELETE FROM triage_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&pool)
            .await
            .unwrap();
        assert!(load_photos(&pool, job_id).await.unwrap().is_empty());
    }
}
