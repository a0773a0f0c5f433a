use std::{fmt, num::NonZeroUsize};

use ndarray::{ArrayView1, ArrayView2};

use crate::{
    backend::Backend,
    data::DataSource,
    error::{ComputeErr, OrchestraErr, Result},
};

/// Counts of (actual, predicted) class pairs. Rows are actual classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    #[inline]
    pub fn record(&mut self, actual: usize, predicted: usize) {
        self.counts[actual * self.classes + predicted] += 1;
    }

    #[inline]
    pub fn count(&self, actual: usize, predicted: usize) -> u64 {
        self.counts[actual * self.classes + predicted]
    }

    pub fn num_classes(&self) -> usize {
        self.classes
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Samples whose prediction matched their label.
    pub fn correct(&self) -> u64 {
        (0..self.classes).map(|c| self.count(c, c)).sum()
    }

    /// Samples actually of class `c`.
    pub fn actual(&self, c: usize) -> u64 {
        (0..self.classes).map(|p| self.count(c, p)).sum()
    }

    /// Samples predicted as class `c`.
    pub fn predicted(&self, c: usize) -> u64 {
        (0..self.classes).map(|a| self.count(a, c)).sum()
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
    }
}

/// Accuracy, precision, recall and F1 derived from a confusion matrix.
///
/// Per-class figures are `None` when undefined (no sample of, or no
/// prediction for, the class); macro averages skip undefined classes.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReport {
    matrix: ConfusionMatrix,
}

impl MetricsReport {
    pub fn new(matrix: ConfusionMatrix) -> Self {
        Self { matrix }
    }

    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    pub fn num_classes(&self) -> usize {
        self.matrix.num_classes()
    }

    /// The number of samples evaluated.
    pub fn total(&self) -> u64 {
        self.matrix.total()
    }

    pub fn correct(&self) -> u64 {
        self.matrix.correct()
    }

    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.correct(), self.total())
    }

    pub fn precision(&self, class: usize) -> Option<f64> {
        ratio(self.matrix.count(class, class), self.matrix.predicted(class))
    }

    pub fn recall(&self, class: usize) -> Option<f64> {
        ratio(self.matrix.count(class, class), self.matrix.actual(class))
    }

    pub fn f1(&self, class: usize) -> Option<f64> {
        let p = self.precision(class)?;
        let r = self.recall(class)?;
        if p + r == 0.0 {
            Some(0.0)
        } else {
            Some(2.0 * p * r / (p + r))
        }
    }

    pub fn macro_precision(&self) -> Option<f64> {
        self.macro_avg(Self::precision)
    }

    pub fn macro_recall(&self) -> Option<f64> {
        self.macro_avg(Self::recall)
    }

    pub fn macro_f1(&self) -> Option<f64> {
        self.macro_avg(Self::f1)
    }

    fn macro_avg(&self, per_class: fn(&Self, usize) -> Option<f64>) -> Option<f64> {
        let defined: Vec<f64> = (0..self.num_classes())
            .filter_map(|c| per_class(self, c))
            .collect();

        (!defined.is_empty()).then(|| defined.iter().sum::<f64>() / defined.len() as f64)
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

struct Figure(Option<f64>);

impl fmt::Display for Figure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.4}"),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.num_classes();

        writeln!(f, "==================== Evaluation Metrics ====================")?;
        writeln!(f, " # of classes:    {n}")?;
        writeln!(f, " # of samples:    {}", self.total())?;
        writeln!(f, " Accuracy:        {}", Figure(self.accuracy()))?;
        writeln!(f, " Precision:       {}", Figure(self.macro_precision()))?;
        writeln!(f, " Recall:          {}", Figure(self.macro_recall()))?;
        writeln!(f, " F1 Score:        {}", Figure(self.macro_f1()))?;
        writeln!(f, "Precision, recall & F1: macro-averaged over classes")?;
        writeln!(f)?;

        writeln!(f, " class  precision  recall     f1         support")?;
        for c in 0..n {
            writeln!(
                f,
                " {c:>5}  {:<9}  {:<9}  {:<9}  {}",
                Figure(self.precision(c)).to_string(),
                Figure(self.recall(c)).to_string(),
                Figure(self.f1(c)).to_string(),
                self.matrix.actual(c)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "===================== Confusion Matrix =====================")?;
        write!(f, "      ")?;
        for p in 0..n {
            write!(f, "{p:>7}")?;
        }
        writeln!(f)?;
        for a in 0..n {
            write!(f, " {a:>4}")?;
            write!(f, " ")?;
            for p in 0..n {
                write!(f, "{:>7}", self.matrix.count(a, p))?;
            }
            writeln!(f)?;
        }
        write!(f, "Rows: actual class, columns: predicted class")
    }
}

/// Scores a model on a held-out source without training it.
#[derive(Debug, Clone)]
pub struct Evaluator {
    matrix: ConfusionMatrix,
}

impl Evaluator {
    /// Creates a new `Evaluator`.
    ///
    /// # Arguments
    /// * `num_classes` - The width of prediction and label rows.
    pub fn new(num_classes: NonZeroUsize) -> Self {
        Self {
            matrix: ConfusionMatrix::new(num_classes.get()),
        }
    }

    /// Runs `backend` over every batch of `source` and accumulates the
    /// predicted-vs-actual counts.
    ///
    /// The source is reset before and after the pass, also when it fails.
    ///
    /// # Arguments
    /// * `backend` - The model, used through `predict` only.
    /// * `source` - The held-out data.
    ///
    /// # Returns
    /// The report so far, `DataCorruption` on a source failure, or
    /// `Inference` if the backend fails or returns rows of the wrong shape.
    pub fn evaluate<B, S>(&mut self, backend: &B, source: &mut S) -> Result<MetricsReport>
    where
        B: Backend,
        S: DataSource + ?Sized,
    {
        source.reset();
        let pass = self.pass(backend, source);
        source.reset();

        pass.map(|_| self.report())
    }

    fn pass<B, S>(&mut self, backend: &B, source: &mut S) -> Result<()>
    where
        B: Backend,
        S: DataSource + ?Sized,
    {
        while let Some(batch) = source.next_batch()? {
            let predictions = backend
                .predict(batch.features())
                .map_err(OrchestraErr::Inference)?;
            self.record(predictions.view(), batch.labels())
                .map_err(OrchestraErr::Inference)?;
        }
        Ok(())
    }

    /// Accumulates one batch of predictions against its labels.
    pub fn record(
        &mut self,
        predictions: ArrayView2<f32>,
        labels: ArrayView2<f32>,
    ) -> std::result::Result<(), ComputeErr> {
        let classes = self.matrix.num_classes();
        check("prediction rows", predictions.nrows(), labels.nrows())?;
        check("prediction columns", predictions.ncols(), classes)?;
        check("label columns", labels.ncols(), classes)?;

        for (pred, label) in predictions.rows().into_iter().zip(labels.rows()) {
            self.matrix.record(argmax(label), argmax(pred));
        }
        Ok(())
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport::new(self.matrix.clone())
    }

    pub fn reset(&mut self) {
        self.matrix.reset();
    }
}

fn check(what: &'static str, got: usize, expected: usize) -> std::result::Result<(), ComputeErr> {
    if got == expected {
        Ok(())
    } else {
        Err(ComputeErr::ShapeMismatch {
            what,
            got,
            expected,
        })
    }
}

/// Index of the largest value; the first wins ties and NaNs never win.
fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best = i;
            best_val = v;
        }
    }
    best
}
