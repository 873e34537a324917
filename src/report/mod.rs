//! 評価結果と可視化

pub mod grid;
pub mod history;

pub use grid::{preview_indices, random_indices, render_tile_grid, GridLayout};
pub use history::{render_history_curves, EpochMetrics, TrainingHistory};

/// データセット1つ分の評価結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// サンプル平均の損失
    pub loss: f64,
    /// 正解率 (0.0〜1.0)
    pub accuracy: f64,
    pub samples: usize,
    /// サンプルごとの予測クラスID
    pub predictions: Vec<usize>,
}

impl EvaluationReport {
    /// 予測と正解ラベルから正解率を求めて結果を作る
    pub fn from_predictions(loss: f64, predictions: Vec<usize>, labels: &[usize]) -> Self {
        let samples = predictions.len();
        let correct = predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();
        let accuracy = if samples == 0 {
            0.0
        } else {
            correct as f64 / samples as f64
        };

        Self {
            loss,
            accuracy,
            samples,
            predictions,
        }
    }

    /// `Train accuracy: 97.50%` 形式の1行
    pub fn accuracy_line(&self, split: &str) -> String {
        format!("{} accuracy: {:.2}%", split, self.accuracy * 100.0)
    }
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loss = {:.4}, accuracy = {:.2}% ({} samples)",
            self.loss,
            self.accuracy * 100.0,
            self.samples
        )
    }
}

/// ソフトマックススコアの行ごとの最大クラス
pub fn argmax_rows(scores: &[f32], num_classes: usize) -> Vec<usize> {
    scores
        .chunks(num_classes.max(1))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, best_score), (i, &s)| {
                    if s > best_score {
                        (i, s)
                    } else {
                        (best, best_score)
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_line() {
        let report = EvaluationReport::from_predictions(0.25, vec![1, 0, 1, 1], &[1, 0, 0, 1]);
        assert_eq!(report.samples, 4);
        assert_eq!(report.accuracy, 0.75);
        assert_eq!(report.accuracy_line("Train"), "Train accuracy: 75.00%");
    }

    #[test]
    fn test_empty_report() {
        let report = EvaluationReport::from_predictions(0.0, Vec::new(), &[]);
        assert_eq!(report.accuracy, 0.0);
    }

    #[test]
    fn test_argmax_rows() {
        let scores = [0.9, 0.1, 0.3, 0.7, 0.5, 0.5];
        assert_eq!(argmax_rows(&scores, 2), vec![0, 1, 0]);
    }
}
