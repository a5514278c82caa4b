use crate::models::answer_script::SCANNED_EXAM_NUMBER_MAX_LEN;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once at startup
/// and handed to every component that needs it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub pipeline: PipelineConfig,
}

/// Options consumed by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tesseract language code passed to the recognizer.
    pub ocr_language: String,
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    pub pdfinfo_bin: String,
    pub render_dpi: u32,
    pub exam_number: ExamNumberPattern,
    /// Minimum similarity for a scanned exam number to be attached to a student.
    pub match_threshold: f64,
    /// Deadline for the write phases (content store + metadata) of one file.
    pub upload_timeout: Duration,
    /// Deadline for extraction and matching of one file.
    pub extraction_timeout: Duration,
    /// Pages of one document rendered/recognized at the same time.
    pub page_concurrency: usize,
    pub key_strategy: KeyStrategy,
    /// Run extraction inside the request for single-file uploads.
    pub inline_single_file: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_language: "eng".into(),
            tesseract_bin: "tesseract".into(),
            pdftoppm_bin: "pdftoppm".into(),
            pdfinfo_bin: "pdfinfo".into(),
            render_dpi: 300,
            exam_number: ExamNumberPattern::default(),
            match_threshold: 0.8,
            upload_timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(120),
            page_concurrency: 2,
            key_strategy: KeyStrategy::FileName,
            inline_single_file: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            bail!("match threshold {} is outside [0, 1]", self.match_threshold);
        }
        if self.page_concurrency == 0 {
            bail!("page concurrency must be at least 1");
        }
        if self.ocr_language.trim().is_empty() {
            bail!("OCR language must not be empty");
        }
        self.exam_number.validate()
    }
}

/// Shape of an institution's exam number: length bounds plus character class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamNumberPattern {
    pub min_length: usize,
    pub max_length: usize,
    pub char_class: CharClass,
    /// Reject tokens without a digit so ordinary words are not taken for ids.
    pub require_digit: bool,
}

impl Default for ExamNumberPattern {
    fn default() -> Self {
        Self {
            min_length: 4,
            max_length: 20,
            char_class: CharClass::UpperAlphanumeric,
            require_digit: true,
        }
    }
}

impl ExamNumberPattern {
    pub fn validate(&self) -> Result<()> {
        if self.min_length == 0 {
            bail!("exam number minimum length must be at least 1");
        }
        if self.min_length > self.max_length {
            bail!(
                "exam number minimum length {} exceeds maximum {}",
                self.min_length,
                self.max_length
            );
        }
        if self.max_length > SCANNED_EXAM_NUMBER_MAX_LEN {
            bail!(
                "exam number maximum length {} exceeds the stored limit of {SCANNED_EXAM_NUMBER_MAX_LEN}",
                self.max_length
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    /// `A-Z` and `0-9`.
    UpperAlphanumeric,
    /// `A-Z`, `a-z` and `0-9`.
    Alphanumeric,
    /// `0-9` only.
    Digits,
}

impl FromStr for CharClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upper-alphanumeric" | "upper_alphanumeric" => Ok(Self::UpperAlphanumeric),
            "alphanumeric" => Ok(Self::Alphanumeric),
            "digits" => Ok(Self::Digits),
            other => Err(format!("unknown character class `{other}`")),
        }
    }
}

/// How content-store keys are derived for uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The raw filename. Same-named uploads overwrite each other's object.
    FileName,
    /// `{record_id}/{file_name}`, unique per record.
    RecordId,
}

impl FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file-name" | "filename" => Ok(Self::FileName),
            "record-id" | "id" => Ok(Self::RecordId),
            other => Err(format!("unknown key strategy `{other}`")),
        }
    }
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::FileName => write!(f, "file-name"),
            KeyStrategy::RecordId => write!(f, "record-id"),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Answer-script intake and identity matching service")]
pub struct Args {
    /// Host to bind to (overrides SCRIPT_INTAKE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SCRIPT_INTAKE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides SCRIPT_INTAKE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SCRIPT_INTAKE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Content-store bucket (overrides SCRIPT_INTAKE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// OCR language (overrides SCRIPT_INTAKE_OCR_LANGUAGE)
    #[arg(long)]
    pub ocr_language: Option<String>,

    /// Minimum similarity to accept a match (overrides SCRIPT_INTAKE_MATCH_THRESHOLD)
    #[arg(long)]
    pub match_threshold: Option<f64>,

    /// Object key strategy: file-name | record-id (overrides SCRIPT_INTAKE_KEY_STRATEGY)
    #[arg(long)]
    pub key_strategy: Option<KeyStrategy>,

    /// Exam number character class: upper-alphanumeric | alphanumeric | digits
    #[arg(long)]
    pub exam_number_class: Option<CharClass>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Insert the demo student roster and exit
    #[arg(long)]
    pub seed: bool,
}

/// What the binary should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Seed,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            ocr_language: args
                .ocr_language
                .unwrap_or(env_or("SCRIPT_INTAKE_OCR_LANGUAGE", defaults.ocr_language)?),
            tesseract_bin: env_or("SCRIPT_INTAKE_TESSERACT_BIN", defaults.tesseract_bin)?,
            pdftoppm_bin: env_or("SCRIPT_INTAKE_PDFTOPPM_BIN", defaults.pdftoppm_bin)?,
            pdfinfo_bin: env_or("SCRIPT_INTAKE_PDFINFO_BIN", defaults.pdfinfo_bin)?,
            render_dpi: env_or("SCRIPT_INTAKE_RENDER_DPI", defaults.render_dpi)?,
            exam_number: ExamNumberPattern {
                min_length: env_or(
                    "SCRIPT_INTAKE_EXAM_NUMBER_MIN_LEN",
                    defaults.exam_number.min_length,
                )?,
                max_length: env_or(
                    "SCRIPT_INTAKE_EXAM_NUMBER_MAX_LEN",
                    defaults.exam_number.max_length,
                )?,
                char_class: match args.exam_number_class {
                    Some(class) => class,
                    None => env_or(
                        "SCRIPT_INTAKE_EXAM_NUMBER_CLASS",
                        defaults.exam_number.char_class,
                    )?,
                },
                require_digit: env_or(
                    "SCRIPT_INTAKE_EXAM_NUMBER_REQUIRE_DIGIT",
                    defaults.exam_number.require_digit,
                )?,
            },
            match_threshold: match args.match_threshold {
                Some(value) => value,
                None => env_or("SCRIPT_INTAKE_MATCH_THRESHOLD", defaults.match_threshold)?,
            },
            upload_timeout: Duration::from_secs(env_or(
                "SCRIPT_INTAKE_UPLOAD_TIMEOUT_SECS",
                defaults.upload_timeout.as_secs(),
            )?),
            extraction_timeout: Duration::from_secs(env_or(
                "SCRIPT_INTAKE_EXTRACTION_TIMEOUT_SECS",
                defaults.extraction_timeout.as_secs(),
            )?),
            page_concurrency: env_or(
                "SCRIPT_INTAKE_PAGE_CONCURRENCY",
                defaults.page_concurrency,
            )?,
            key_strategy: match args.key_strategy {
                Some(strategy) => strategy,
                None => env_or("SCRIPT_INTAKE_KEY_STRATEGY", defaults.key_strategy)?,
            },
            inline_single_file: env_or(
                "SCRIPT_INTAKE_INLINE_SINGLE_FILE",
                defaults.inline_single_file,
            )?,
        };
        pipeline.validate()?;

        let cfg = Self {
            host: args
                .host
                .unwrap_or(env_or("SCRIPT_INTAKE_HOST", "0.0.0.0".to_string())?),
            port: match args.port {
                Some(port) => port,
                None => env_or("SCRIPT_INTAKE_PORT", 3000u16)?,
            },
            storage_dir: args.storage_dir.unwrap_or(env_or(
                "SCRIPT_INTAKE_STORAGE_DIR",
                "./data/objects".to_string(),
            )?),
            database_url: args.database_url.unwrap_or(env_or(
                "SCRIPT_INTAKE_DATABASE_URL",
                "sqlite://./data/meta/script_intake.db".to_string(),
            )?),
            bucket: args
                .bucket
                .unwrap_or(env_or("SCRIPT_INTAKE_BUCKET", "answer-scripts".to_string())?),
            pipeline,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.seed {
            RunMode::Seed
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {key} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {key}")),
    }
}
