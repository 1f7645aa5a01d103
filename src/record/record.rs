use super::error::{RecordError, RecordResult};
use crate::btree::BPlusKey;

/// Bytes reserved for the movie identifier (`tconst`)
pub const MOVIE_ID_LEN: usize = 10;

/// Simulated on-disk size of one record:
/// 10-byte id + 2 bytes alignment + 4-byte float rating + 4-byte int votes
pub const RECORD_SIZE: usize = 20;

/// A single movie-rating row
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub movie_id: String,
    pub average_rating: f32,
    pub num_votes: BPlusKey,
}

impl Record {
    /// Create a new record
    pub fn new(movie_id: impl Into<String>, average_rating: f32, num_votes: BPlusKey) -> Self {
        Self {
            movie_id: movie_id.into(),
            average_rating,
            num_votes,
        }
    }

    /// The indexed key of this record
    pub fn key(&self) -> BPlusKey {
        self.num_votes
    }

    /// Build a record from the three text fields of a TSV row
    /// (`tconst`, `averageRating`, `numVotes`)
    pub fn from_fields<'a, I>(fields: I) -> RecordResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = fields.into_iter();

        let movie_id = fields
            .next()
            .map(str::trim)
            .ok_or(RecordError::MissingField("tconst"))?;
        if movie_id.is_empty() || movie_id.len() > MOVIE_ID_LEN {
            return Err(RecordError::InvalidField {
                field: "tconst",
                value: movie_id.to_string(),
            });
        }

        let rating = fields
            .next()
            .map(str::trim)
            .ok_or(RecordError::MissingField("averageRating"))?;
        let average_rating = rating
            .parse::<f32>()
            .map_err(|_| RecordError::InvalidField {
                field: "averageRating",
                value: rating.to_string(),
            })?;

        let votes = fields
            .next()
            .map(str::trim)
            .ok_or(RecordError::MissingField("numVotes"))?;
        let num_votes = votes
            .parse::<BPlusKey>()
            .map_err(|_| RecordError::InvalidField {
                field: "numVotes",
                value: votes.to_string(),
            })?;

        Ok(Self::new(movie_id, average_rating, num_votes))
    }
}
