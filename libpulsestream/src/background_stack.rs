use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use super::error::StackError;

/// Reductions a BackgroundStack can compute over its buffered frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reduction {
    Std,
    Mean,
    Sum,
    Median,
}

impl Reduction {
    pub const ALL: [Reduction; 4] = [Self::Std, Self::Mean, Self::Sum, Self::Median];

    /// The pure function behind each reduction
    fn function(self) -> fn(ArrayViewD<'_, f64>) -> ArrayD<f64> {
        match self {
            Self::Std => std_of,
            Self::Mean => mean_of,
            Self::Sum => sum_of,
            Self::Median => median_of,
        }
    }
}

// Frames are stacked along axis 0 and never empty when these are called

fn std_of(data: ArrayViewD<'_, f64>) -> ArrayD<f64> {
    data.std_axis(Axis(0), 0.0)
}

fn mean_of(data: ArrayViewD<'_, f64>) -> ArrayD<f64> {
    data.sum_axis(Axis(0)) / data.len_of(Axis(0)) as f64
}

fn sum_of(data: ArrayViewD<'_, f64>) -> ArrayD<f64> {
    data.sum_axis(Axis(0))
}

fn median_of(data: ArrayViewD<'_, f64>) -> ArrayD<f64> {
    data.map_axis(Axis(0), |lane| median(lane.to_vec()))
}

impl FromStr for Reduction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "std" => Ok(Self::Std),
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "median" => Ok(Self::Median),
            _ => Err(format!("unknown reduction {s}")),
        }
    }
}

impl Display for Reduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Std => write!(f, "std"),
            Self::Mean => write!(f, "mean"),
            Self::Sum => write!(f, "sum"),
            Self::Median => write!(f, "median"),
        }
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        f64::NAN
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Rolling stack of the last `max_len` detector frames, used to build background
/// statistics. Once full, new frames overwrite the oldest slot.
#[derive(Debug, Clone)]
pub struct BackgroundStack {
    name: String,
    max_len: usize,
    buffer: Option<ArrayD<f64>>,
    current_index: usize,
}

impl BackgroundStack {
    pub fn new(name: &str, max_len: usize) -> Result<Self, StackError> {
        if max_len == 0 {
            return Err(StackError::ZeroLength);
        }
        Ok(Self {
            name: name.to_string(),
            max_len,
            buffer: None,
            current_index: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clear(&mut self) {
        self.buffer = None;
        self.current_index = 0;
    }

    /// True once every slot holds a frame
    pub fn filled(&self) -> bool {
        self.current_index >= self.max_len
    }

    /// Add a frame. The first frame fixes the frame shape until the next clear.
    pub fn add(&mut self, frame: &ArrayD<f64>) -> Result<(), StackError> {
        let buffer = self.buffer.get_or_insert_with(|| {
            let mut shape = vec![self.max_len];
            shape.extend_from_slice(frame.shape());
            ArrayD::zeros(IxDyn(&shape))
        });
        if &buffer.shape()[1..] != frame.shape() {
            return Err(StackError::ShapeMismatch(
                frame.shape().to_vec(),
                buffer.shape()[1..].to_vec(),
            ));
        }
        buffer
            .index_axis_mut(Axis(0), self.current_index % self.max_len)
            .assign(frame);
        self.current_index += 1;
        Ok(())
    }

    /// The frames currently held, stacked along axis 0
    fn data(&self) -> Option<ArrayViewD<'_, f64>> {
        let buffer = self.buffer.as_ref()?;
        let n_frames = self.current_index.min(self.max_len);
        Some(buffer.slice_axis(Axis(0), Slice::from(0..n_frames)))
    }

    /// Compute one reduction over the held frames. None until a frame has been added.
    pub fn reduce(&self, reduction: Reduction) -> Option<ArrayD<f64>> {
        self.data().map(reduction.function())
    }

    /// Compute every requested reduction
    pub fn reductions(&self, outputs: &[Reduction]) -> BTreeMap<Reduction, ArrayD<f64>> {
        outputs
            .iter()
            .filter_map(|r| self.reduce(*r).map(|result| (*r, result)))
            .collect()
    }

    /// True when the stack has reached a multiple of `interval` frames, i.e. when a
    /// periodic writer should emit the reductions.
    pub fn is_write_due(&self, interval: Option<usize>) -> bool {
        match interval {
            Some(0) => false,
            Some(n) => self.current_index > 0 && self.current_index % n == 0,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, ArrayD};

    fn frame(values: &[f64]) -> ArrayD<f64> {
        arr1(values).into_dyn()
    }

    #[test]
    fn test_reductions_over_partial_stack() {
        let mut stack = BackgroundStack::new("dark", 4).unwrap();
        assert!(stack.reduce(Reduction::Mean).is_none());
        stack.add(&frame(&[1.0, 10.0])).unwrap();
        stack.add(&frame(&[3.0, 20.0])).unwrap();
        stack.add(&frame(&[8.0, 30.0])).unwrap();
        assert!(!stack.filled());

        let results = stack.reductions(&Reduction::ALL);
        assert_eq!(results[&Reduction::Sum], frame(&[12.0, 60.0]));
        assert_eq!(results[&Reduction::Mean], frame(&[4.0, 20.0]));
        assert_eq!(results[&Reduction::Median], frame(&[3.0, 20.0]));
        let std = results[&Reduction::Std].as_slice().unwrap();
        assert!((std[1] - (200.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_overwrite() {
        let mut stack = BackgroundStack::new("dark", 2).unwrap();
        for v in [1.0, 2.0, 3.0] {
            stack.add(&frame(&[v])).unwrap();
        }
        assert!(stack.filled());
        // 1.0 was overwritten by 3.0
        assert_eq!(stack.reduce(Reduction::Sum).unwrap(), frame(&[5.0]));
        assert_eq!(stack.reduce(Reduction::Median).unwrap(), frame(&[2.5]));
    }

    #[test]
    fn test_shape_mismatch_and_write_interval() {
        let mut stack = BackgroundStack::new("dark", 3).unwrap();
        stack.add(&frame(&[1.0, 2.0])).unwrap();
        assert!(matches!(
            stack.add(&frame(&[1.0])),
            Err(StackError::ShapeMismatch(_, _))
        ));
        assert!(!stack.is_write_due(Some(2)));
        stack.add(&frame(&[1.0, 2.0])).unwrap();
        assert!(stack.is_write_due(Some(2)));
        assert!(stack.is_write_due(None));
        assert!(BackgroundStack::new("empty", 0).is_err());
        assert_eq!("median".parse::<Reduction>().unwrap(), Reduction::Median);
    }
}
