use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Best-so-far losses after every epoch, each row of length N.
///
/// Members that never improved keep `+inf`; on disk non-finite values are
/// written as the strings `"inf"`, `"-inf"` and `"NaN"` so the file reads back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    #[serde(with = "loss_rows")]
    pub train_losses: Vec<Vec<f64>>,
    #[serde(with = "loss_rows")]
    pub val_losses: Vec<Vec<f64>>,
}

impl TrainingHistory {
    pub fn push(&mut self, train: &[f64], val: &[f64]) {
        self.train_losses.push(train.to_vec());
        self.val_losses.push(val.to_vec());
    }

    pub fn epochs_run(&self) -> usize {
        self.val_losses.len()
    }

    /// `(epochs_run, n_models)`
    pub fn shape(&self) -> (usize, usize) {
        (
            self.epochs_run(),
            self.val_losses.first().map_or(0, Vec::len),
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

mod loss_rows {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Loss {
        Finite(f64),
        NonFinite(String),
    }

    impl From<f64> for Loss {
        fn from(value: f64) -> Self {
            if value.is_finite() {
                Self::Finite(value)
            } else {
                Self::NonFinite(value.to_string())
            }
        }
    }

    impl Loss {
        fn value(self) -> Result<f64, String> {
            match self {
                Self::Finite(v) => Ok(v),
                Self::NonFinite(s) => s.parse().map_err(|_| format!("not a loss value: {s:?}")),
            }
        }
    }

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<Vec<Loss>> = rows
            .iter()
            .map(|row| row.iter().map(|&v| Loss::from(v)).collect())
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error> {
        Vec::<Vec<Loss>>::deserialize(deserializer)?
            .into_iter()
            .map(|row| row.into_iter().map(Loss::value).collect::<Result<Vec<_>, _>>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(D::Error::custom)
    }
}
