// Parquet encoding of review batches.
//
// Column names and types match the files the downstream views glob over
// (`steam_reviews_*.parquet`), so they must not change casually.

use crate::model::ReviewRecord;
use arrow::array::{ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use ingester_core::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use std::sync::Arc;

pub fn reviews_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("rec_id", DataType::Int64, false),
        Field::new("author_id", DataType::Int64, false),
        Field::new("appid", DataType::Int64, false),
        Field::new("playtime_forever", DataType::Int64, true),
        Field::new("playtime_last_two_weeks", DataType::Int64, true),
        Field::new("playtime_at_review", DataType::Int64, true),
        Field::new("num_games_owned", DataType::Int64, true),
        Field::new("num_reviews", DataType::Int64, true),
        Field::new("last_played", DataType::Int64, true),
        Field::new("language", DataType::Utf8, false),
        Field::new("review", DataType::Utf8, false),
        Field::new("timestamp_created", DataType::Int64, false),
        Field::new("timestamp_updated", DataType::Int64, false),
        Field::new("voted_up", DataType::Boolean, false),
        Field::new("votes_up", DataType::Int64, false),
        Field::new("votes_funny", DataType::Int64, false),
        Field::new("weighted_vote_score", DataType::Float64, false),
        Field::new("comment_count", DataType::Int64, false),
        Field::new("steam_purchase", DataType::Boolean, false),
        Field::new("received_for_free", DataType::Boolean, false),
        Field::new("written_during_early_access", DataType::Boolean, false),
        Field::new("primarily_steam_deck", DataType::Boolean, false),
        Field::new("scrape_date", DataType::Date32, false),
    ]))
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(32 * 1024)
        .build()
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    // NaiveDate::default() is 1970-01-01
    (date - NaiveDate::default()).num_days() as i32
}

fn int_column(records: &[ReviewRecord], f: impl Fn(&ReviewRecord) -> i64) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(records.iter().map(f)))
}

fn opt_int_column(records: &[ReviewRecord], f: impl Fn(&ReviewRecord) -> Option<i64>) -> ArrayRef {
    Arc::new(records.iter().map(f).collect::<Int64Array>())
}

fn bool_column(records: &[ReviewRecord], f: impl Fn(&ReviewRecord) -> bool) -> ArrayRef {
    Arc::new(records.iter().map(|r| Some(f(r))).collect::<BooleanArray>())
}

pub fn to_record_batch(records: &[ReviewRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        int_column(records, |r| r.rec_id),
        int_column(records, |r| r.author_id),
        int_column(records, |r| r.appid),
        opt_int_column(records, |r| r.playtime_forever),
        opt_int_column(records, |r| r.playtime_last_two_weeks),
        opt_int_column(records, |r| r.playtime_at_review),
        opt_int_column(records, |r| r.num_games_owned),
        opt_int_column(records, |r| r.num_reviews),
        opt_int_column(records, |r| r.last_played),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.language.as_str()))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.review.as_str()))),
        int_column(records, |r| r.timestamp_created),
        int_column(records, |r| r.timestamp_updated),
        bool_column(records, |r| r.voted_up),
        int_column(records, |r| r.votes_up),
        int_column(records, |r| r.votes_funny),
        Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.weighted_vote_score),
        )),
        int_column(records, |r| r.comment_count),
        bool_column(records, |r| r.steam_purchase),
        bool_column(records, |r| r.received_for_free),
        bool_column(records, |r| r.written_during_early_access),
        bool_column(records, |r| r.primarily_steam_deck),
        Arc::new(Date32Array::from_iter_values(
            records.iter().map(|r| days_since_epoch(r.scrape_date)),
        )),
    ];

    RecordBatch::try_new(reviews_schema(), columns)
        .map_err(|e| Error::Storage(format!("failed to build record batch: {}", e)))
}

/// Encode `records` as one Parquet file held in memory.
pub fn encode(records: &[ReviewRecord]) -> Result<Bytes> {
    let batch = to_record_batch(records)?;
    let mut buffer = Vec::new();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(writer_properties()))
        .map_err(|e| Error::Storage(format!("failed to create parquet writer: {}", e)))?;
    writer
        .write(&batch)
        .map_err(|e| Error::Storage(format!("failed to write parquet: {}", e)))?;
    writer
        .close()
        .map_err(|e| Error::Storage(format!("failed to finish parquet: {}", e)))?;

    Ok(Bytes::from(buffer))
}
