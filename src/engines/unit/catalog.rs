use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Waveform;

use super::features::{average, resample, FeatureExtractor};
use super::model::UnitError;
use super::vocab::Vocabulary;

/// How [`Catalog::select_one`] picks among a word's recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Lexicographically first file name; reproducible.
    #[default]
    First,
    /// Uniform random choice.
    Random,
}

/// One recorded example of a word, with its analysis.
#[derive(Debug, Clone)]
pub struct Recording {
    pub speaker: String,
    pub word: String,
    pub file_name: String,
    pub path: PathBuf,
    /// Audio at the catalog's sample rate.
    pub waveform: Waveform,
    /// MFCC frames, `(frames, n_mfcc)`.
    pub features: Array2<f64>,
    /// Time-mean of `features`.
    pub average: Array1<f64>,
}

/// Where recordings come from: a directory listing and a decoder.
pub trait RecordingSource {
    /// File names (not paths) directly inside `dir`.
    fn list(&self, dir: &Path) -> Result<Vec<String>, UnitError>;

    /// Decode the audio file at `path`.
    fn decode(&self, path: &Path) -> Result<Waveform, UnitError>;
}

/// Recordings stored as `.wav` files on disk, one directory per speaker.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRecordingSource;

impl FsRecordingSource {
    /// Speaker directories directly under `root`, sorted.
    pub fn speakers(root: &Path) -> Result<Vec<String>, UnitError> {
        let mut speakers = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                speakers.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        speakers.sort();
        Ok(speakers)
    }
}

impl RecordingSource for FsRecordingSource {
    fn list(&self, dir: &Path) -> Result<Vec<String>, UnitError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn decode(&self, path: &Path) -> Result<Waveform, UnitError> {
        Ok(Waveform::read_wav(path)?)
    }
}

/// In-memory recordings keyed by path; handy for tests and generated data.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordingSource {
    files: BTreeMap<PathBuf, Waveform>,
}

impl MemoryRecordingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, waveform: Waveform) {
        self.files.insert(path.into(), waveform);
    }
}

impl RecordingSource for MemoryRecordingSource {
    fn list(&self, dir: &Path) -> Result<Vec<String>, UnitError> {
        Ok(self
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn decode(&self, path: &Path) -> Result<Waveform, UnitError> {
        self.files.get(path).cloned().ok_or_else(|| {
            UnitError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }
}

/// Word named by a recording's file name.
///
/// Only `.wav` files count (extension case-insensitive). The word is the
/// lowercased stem up to its first non-alphabetic character, so
/// `Aku_01.wav` and `aku2.wav` both name `aku`.
pub fn word_of(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case("wav") {
        return None;
    }
    let word: String = stem
        .chars()
        .take_while(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();
    (!word.is_empty()).then_some(word)
}

/// A file that was found but could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: String,
}

/// Immutable index of one speaker's recordings, grouped by word.
#[derive(Debug)]
pub struct Catalog {
    speaker: String,
    entries: BTreeMap<String, Vec<Recording>>,
    skipped: Vec<SkippedFile>,
}

impl Catalog {
    /// Scan `root/speaker` once and analyse every recording of a vocabulary word.
    ///
    /// Files that fail to decode or analyse are skipped and listed in
    /// [`skipped`](Self::skipped). Fails with [`UnitError::CatalogEmpty`] when
    /// no usable recording of any vocabulary word exists.
    pub fn build<S: RecordingSource + ?Sized>(
        source: &S,
        root: &Path,
        speaker: &str,
        vocab: &Vocabulary,
        extractor: &FeatureExtractor,
    ) -> Result<Self, UnitError> {
        let dir = root.join(speaker);
        let mut names = source.list(&dir)?;
        names.sort();

        let mut entries: BTreeMap<String, Vec<Recording>> = BTreeMap::new();
        let mut skipped = Vec::new();

        for file_name in names {
            let word = match word_of(&file_name) {
                Some(word) if vocab.contains(&word) => word,
                _ => {
                    log::debug!("Ignoring '{file_name}': not a recording of a vocabulary word");
                    continue;
                }
            };

            let path = dir.join(&file_name);
            match analyse(source, &path, extractor) {
                Ok((waveform, features, average)) => {
                    entries.entry(word.clone()).or_default().push(Recording {
                        speaker: speaker.to_string(),
                        word,
                        file_name,
                        path,
                        waveform,
                        features,
                        average,
                    });
                }
                Err(e) => {
                    log::warn!("Skipping '{}': {e}", path.display());
                    skipped.push(SkippedFile {
                        file_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if entries.is_empty() {
            return Err(UnitError::CatalogEmpty(speaker.to_string()));
        }

        log::info!(
            "Catalog for speaker '{speaker}': {} words, {} recordings, {} skipped",
            entries.len(),
            entries.values().map(Vec::len).sum::<usize>(),
            skipped.len()
        );

        Ok(Self {
            speaker: speaker.to_string(),
            entries,
            skipped,
        })
    }

    pub fn speaker(&self) -> &str {
        &self.speaker
    }

    /// Recordings of `word`, sorted by file name.
    pub fn lookup(&self, word: &str) -> Result<&[Recording], UnitError> {
        self.entries
            .get(&word.to_lowercase())
            .map(Vec::as_slice)
            .ok_or_else(|| UnitError::WordNotFound(word.to_string()))
    }

    pub fn select_one<R: Rng + ?Sized>(
        &self,
        word: &str,
        policy: SelectionPolicy,
        rng: &mut R,
    ) -> Result<&Recording, UnitError> {
        let recordings = self.lookup(word)?;
        let chosen = match policy {
            SelectionPolicy::First => recordings.first(),
            SelectionPolicy::Random => recordings.choose(rng),
        };
        chosen.ok_or_else(|| UnitError::WordNotFound(word.to_string()))
    }

    /// Words with at least one recording, sorted.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|w| w.as_str())
    }

    /// Total number of recordings.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Files that were found but could not be analysed.
    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }
}

fn analyse<S: RecordingSource + ?Sized>(
    source: &S,
    path: &Path,
    extractor: &FeatureExtractor,
) -> Result<(Waveform, Array2<f64>, Array1<f64>), UnitError> {
    let waveform = source.decode(path)?;
    let features = extractor.extract(&waveform.samples, waveform.sample_rate)?;
    let avg = average(&features)?;

    let target_rate = extractor.sample_rate();
    let waveform = if waveform.sample_rate == target_rate {
        waveform
    } else {
        let signal: Vec<f64> = waveform.samples.iter().map(|&s| s as f64).collect();
        let samples = resample(&signal, waveform.sample_rate, target_rate)
            .into_iter()
            .map(|s| s as f32)
            .collect();
        Waveform::new(samples, target_rate)
    };
    Ok((waveform, features, avg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::unit::testing::{small_config, tone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn source() -> MemoryRecordingSource {
        let mut source = MemoryRecordingSource::new();
        source.insert("data/afin/kamu_b.wav", tone(500.0, 3000));
        source.insert("data/afin/Aku_2.wav", tone(220.0, 2500));
        source.insert("data/afin/aku_1.wav", tone(240.0, 2000));
        source.insert("data/afin/kamu_a.wav", tone(520.0, 2200));
        source.insert("data/afin/xyz_1.wav", tone(900.0, 2000));
        source.insert("data/afin/notes.txt", tone(900.0, 10));
        source.insert("data/hani/aku_1.wav", tone(300.0, 2000));
        source
    }

    fn build(source: &MemoryRecordingSource, speaker: &str) -> Result<Catalog, UnitError> {
        let config = small_config();
        let extractor = FeatureExtractor::new(&config);
        Catalog::build(source, Path::new("data"), speaker, &config.vocabulary, &extractor)
    }

    #[test]
    fn word_of_uses_alphabetic_prefix() {
        assert_eq!(word_of("Aku_01.wav").as_deref(), Some("aku"));
        assert_eq!(word_of("kamu2.WAV").as_deref(), Some("kamu"));
        assert_eq!(word_of("selamat-pagi.wav").as_deref(), Some("selamat"));
        assert_eq!(word_of("aku.mp3"), None);
        assert_eq!(word_of("01.wav"), None);
        assert_eq!(word_of("README"), None);
    }

    #[test]
    fn lookup_returns_only_recordings_of_the_word() {
        let catalog = build(&source(), "afin").unwrap();
        for word in ["aku", "kamu"] {
            let recordings = catalog.lookup(word).unwrap();
            assert!(!recordings.is_empty());
            for rec in recordings {
                assert_eq!(rec.word, word);
                assert_eq!(word_of(&rec.file_name).as_deref(), Some(word));
                assert_eq!(rec.speaker, "afin");
                assert_eq!(rec.average.len(), 13);
            }
        }
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.words().collect::<Vec<_>>(), vec!["aku", "kamu"]);
    }

    #[test]
    fn recordings_are_sorted_by_file_name() {
        let catalog = build(&source(), "afin").unwrap();
        let names: Vec<_> = catalog
            .lookup("AKU")
            .unwrap()
            .iter()
            .map(|r| r.file_name.as_str())
            .collect();
        assert_eq!(names, vec!["Aku_2.wav", "aku_1.wav"]);
    }

    #[test]
    fn speakers_are_independent() {
        let catalog = build(&source(), "hani").unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(matches!(catalog.lookup("kamu"), Err(UnitError::WordNotFound(_))));
    }

    #[test]
    fn missing_word_is_not_found() {
        let catalog = build(&source(), "afin").unwrap();
        assert!(matches!(
            catalog.lookup("pagi"),
            Err(UnitError::WordNotFound(w)) if w == "pagi"
        ));
    }

    #[test]
    fn unreadable_recordings_are_skipped() {
        let mut source = source();
        source.insert("data/afin/makan_1.wav", Waveform::new(Vec::new(), 16000));
        let catalog = build(&source, "afin").unwrap();

        assert!(catalog.lookup("makan").is_err());
        assert_eq!(catalog.skipped().len(), 1);
        assert_eq!(catalog.skipped()[0].file_name, "makan_1.wav");
    }

    #[test]
    fn no_matching_recordings_is_catalog_empty() {
        let mut source = MemoryRecordingSource::new();
        source.insert("data/aul/xyz.wav", tone(100.0, 1000));
        assert!(matches!(
            build(&source, "aul"),
            Err(UnitError::CatalogEmpty(s)) if s == "aul"
        ));
    }

    #[test]
    fn first_policy_is_deterministic_and_random_stays_in_entry() {
        let catalog = build(&source(), "afin").unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..5 {
            let first = catalog.select_one("kamu", SelectionPolicy::First, &mut rng).unwrap();
            assert_eq!(first.file_name, "kamu_a.wav");
        }
        for _ in 0..20 {
            let random = catalog.select_one("kamu", SelectionPolicy::Random, &mut rng).unwrap();
            assert_eq!(random.word, "kamu");
        }
    }

    #[test]
    fn resamples_recordings_to_catalog_rate() {
        let mut source = MemoryRecordingSource::new();
        source.insert(
            "data/aul/pagi_1.wav",
            Waveform::new(vec![0.1; 4000], 8000),
        );
        let catalog = build(&source, "aul").unwrap();
        let rec = &catalog.lookup("pagi").unwrap()[0];
        assert_eq!(rec.waveform.sample_rate, 16000);
        assert_eq!(rec.waveform.samples.len(), 8000);
    }

    #[test]
    fn reads_wav_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let speaker_dir = dir.path().join("afin");
        std::fs::create_dir_all(&speaker_dir).unwrap();
        std::fs::create_dir_all(dir.path().join("hani")).unwrap();
        tone(300.0, 2000).write_wav(&speaker_dir.join("aku_1.wav")).unwrap();
        tone(600.0, 2000).write_wav(&speaker_dir.join("siang_1.wav")).unwrap();

        assert_eq!(
            FsRecordingSource::speakers(dir.path()).unwrap(),
            vec!["afin".to_string(), "hani".to_string()]
        );

        let config = small_config();
        let extractor = FeatureExtractor::new(&config);
        let catalog = Catalog::build(
            &FsRecordingSource,
            dir.path(),
            "afin",
            &config.vocabulary,
            &extractor,
        )
        .unwrap();
        assert_eq!(catalog.words().collect::<Vec<_>>(), vec!["aku", "siang"]);
        assert_eq!(catalog.lookup("siang").unwrap()[0].waveform.samples.len(), 2000);
    }
}
