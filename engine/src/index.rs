//! The similarity index: standardized, L2-normalized feature vectors
//! searched by inner product (cosine similarity on unit vectors).
//!
//! The index is derived state, rebuildable from the store at any time.
//! [`Scaler`] parameters are fit at build time and frozen until the next
//! build; incremental [`SimilarityIndex::add`]s reuse the frozen scaler,
//! which drifts as the library distribution changes. The engine bounds
//! that drift by forcing a rebuild every `rebuild_every` additions.
//!
//! All math here is single precision.

use ndarray::{Array1, Array2, ArrayView1};

use crate::errors::IndexError;
use resona_storage::db::schemas::track::TrackId;

/// What kind of index this is, for diagnostics.
pub const INDEX_KIND: &str = "flat-ip";

/// Standard deviations below this are treated as 1 to keep constant
/// dimensions from exploding.
const STD_FLOOR: f32 = 1e-8;

/// Norms below this are passed through unchanged; zero vectors stay zero
/// and score 0 against everything.
const NORM_FLOOR: f32 = 1e-12;

/// Per-dimension standardizer, fit once per index build.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    mean: Array1<f32>,
    std: Array1<f32>,
}

impl Scaler {
    /// Fit per-dimension mean and (population) standard deviation.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn fit(rows: &Array2<f32>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let n = rows.nrows().max(1) as f32;
        let mean = rows.sum_axis(ndarray::Axis(0)) / n;

        let mut variance = Array1::<f32>::zeros(rows.ncols());
        for row in rows.rows() {
            for (v, (&x, &m)) in variance.iter_mut().zip(row.iter().zip(&mean)) {
                *v += (x - m).powi(2);
            }
        }
        variance /= n;
        let std = variance.mapv(|v| {
            let s = v.sqrt();
            if s < STD_FLOOR {
                1.
            } else {
                s
            }
        });

        Self { mean, std }
    }

    #[must_use]
    #[inline]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Standardize one vector in place.
    #[inline]
    pub fn transform(&self, vector: &mut Array1<f32>) {
        *vector -= &self.mean;
        *vector /= &self.std;
    }
}

fn normalize(vector: &mut Array1<f32>) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > NORM_FLOOR {
        *vector /= norm;
    }
}

/// What happened on an incremental add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The vector was standardized with the frozen scaler and appended.
    Added {
        /// Additions since the last build, this one included.
        adds_since_build: usize,
    },
    /// No build has happened yet; the add was dropped and the index
    /// marked dirty so the next rebuild picks the row up from the store.
    Deferred,
}

/// Index statistics, for diagnostics and the stats surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub count: usize,
    pub dim: Option<usize>,
    pub kind: &'static str,
    pub generation: u64,
}

/// Flat inner-product index over standardized, unit-norm vectors.
#[derive(Debug, Default)]
pub struct SimilarityIndex {
    scaler: Option<Scaler>,
    vectors: Option<Array2<f32>>,
    ids: Vec<TrackId>,
    adds_since_build: usize,
    generation: u64,
    dirty: bool,
}

impl SimilarityIndex {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a build with data has happened.
    #[must_use]
    #[inline]
    pub fn is_built(&self) -> bool {
        self.scaler.is_some()
    }

    /// Whether rows were deferred before the first build.
    #[must_use]
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Additions since the last build.
    #[must_use]
    #[inline]
    pub fn adds_since_build(&self) -> usize {
        self.adds_since_build
    }

    /// Bumped on every build.
    #[must_use]
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fit the scaler over `entries`, standardize and normalize every row,
    /// and install the result as the new index generation.
    ///
    /// An empty `entries` resets the index to the unbuilt state (the
    /// generation still advances, since derived state was replaced).
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::SchemaMismatch`] if the rows disagree on
    /// dimension.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn build(&mut self, entries: Vec<(TrackId, Vec<f32>)>) -> Result<(), IndexError> {
        self.generation += 1;
        self.adds_since_build = 0;
        self.dirty = false;

        let Some(dim) = entries.first().map(|(_, v)| v.len()) else {
            self.scaler = None;
            self.vectors = None;
            self.ids = Vec::new();
            return Ok(());
        };

        if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != dim) {
            return Err(IndexError::SchemaMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        let mut matrix = Array2::zeros((entries.len(), dim));
        let mut ids = Vec::with_capacity(entries.len());
        for ((id, vector), mut row) in entries.into_iter().zip(matrix.rows_mut()) {
            row.assign(&ArrayView1::from(&vector));
            ids.push(id);
        }

        let scaler = Scaler::fit(&matrix);
        for mut row in matrix.rows_mut() {
            let mut vector = row.to_owned();
            scaler.transform(&mut vector);
            normalize(&mut vector);
            row.assign(&vector);
        }

        self.scaler = Some(scaler);
        self.vectors = Some(matrix);
        self.ids = ids;
        Ok(())
    }

    /// Append one vector using the frozen scaler.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::SchemaMismatch`] if the vector's dimension
    /// differs from the index's.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn add(&mut self, id: TrackId, vector: &[f32]) -> Result<AddOutcome, IndexError> {
        let Some(scaler) = &self.scaler else {
            self.dirty = true;
            return Ok(AddOutcome::Deferred);
        };
        if vector.len() != scaler.dim() {
            return Err(IndexError::SchemaMismatch {
                expected: scaler.dim(),
                actual: vector.len(),
            });
        }

        let mut row = Array1::from(vector.to_vec());
        scaler.transform(&mut row);
        normalize(&mut row);

        let vectors = self
            .vectors
            .get_or_insert_with(|| Array2::zeros((0, vector.len())));
        vectors
            .push_row(row.view())
            .map_err(|_| IndexError::SchemaMismatch {
                expected: scaler.dim(),
                actual: vector.len(),
            })?;
        self.ids.push(id);
        self.adds_since_build += 1;

        Ok(AddOutcome::Added {
            adds_since_build: self.adds_since_build,
        })
    }

    /// Top-`k` rows by inner product with the standardized, normalized
    /// query. Similarities are in [-1, 1] and non-increasing; an empty or
    /// unbuilt index yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::SchemaMismatch`] if the query's dimension
    /// differs from the index's.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, TrackId)>, IndexError> {
        let (Some(scaler), Some(vectors)) = (&self.scaler, &self.vectors) else {
            return Ok(Vec::new());
        };
        if vectors.nrows() == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != scaler.dim() {
            return Err(IndexError::SchemaMismatch {
                expected: scaler.dim(),
                actual: query.len(),
            });
        }

        let mut q = Array1::from(query.to_vec());
        scaler.transform(&mut q);
        normalize(&mut q);

        let similarities = vectors.dot(&q);
        let mut ranked: Vec<(f32, TrackId)> = similarities
            .iter()
            .zip(&self.ids)
            .map(|(&s, id)| (s, id.clone()))
            .collect();
        ranked.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Unit-norm check hook for tests and diagnostics: the maximum
    /// absolute deviation of any stored row from unit norm (zero rows are
    /// exempt, they pass through normalization unchanged).
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn max_norm_deviation(&self) -> f32 {
        let Some(vectors) = &self.vectors else {
            return 0.;
        };
        let mut worst = 0.0_f32;
        for row in vectors.rows() {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > NORM_FLOOR {
                worst = worst.max((norm - 1.).abs());
            }
        }
        worst
    }

    #[must_use]
    #[inline]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            count: self.ids.len(),
            dim: self.scaler.as_ref().map(Scaler::dim),
            kind: INDEX_KIND,
            generation: self.generation,
        }
    }
}
