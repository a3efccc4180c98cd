use super::ScanError;
use crate::model::ScanRequest;
use std::iter::FusedIterator;
use std::sync::Arc;

/// One point of a scan: the axis value to move to, and where it sits in the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub axis: Arc<str>,
    pub value: f64,
    pub index: usize,
}

impl Position {
    /// Number of scan dimensions this position indexes.
    pub fn rank(&self) -> usize {
        1
    }
}

/// Steps a single axis through an explicit list of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayGenerator {
    axis: Arc<str>,
    positions: Vec<f64>,
}

impl ArrayGenerator {
    pub fn new(axis: impl Into<String>, positions: Vec<f64>) -> Result<Self, ScanError> {
        let axis = axis.into();
        if axis.trim().is_empty() {
            return Err(ScanError::MissingAxis);
        }
        if positions.is_empty() {
            return Err(ScanError::NoPositions { axis });
        }
        Ok(Self {
            axis: axis.into(),
            positions,
        })
    }

    pub fn from_request(request: &ScanRequest) -> Result<Self, ScanError> {
        Self::new(request.axis.clone(), request.positions.clone())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> Positions<'_> {
        Positions {
            axis: &self.axis,
            values: self.positions.iter().enumerate(),
        }
    }
}

impl<'a> IntoIterator for &'a ArrayGenerator {
    type Item = Position;
    type IntoIter = Positions<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy position sequence of an [`ArrayGenerator`]. Its size is known up front.
#[derive(Debug, Clone)]
pub struct Positions<'a> {
    axis: &'a Arc<str>,
    values: std::iter::Enumerate<std::slice::Iter<'a, f64>>,
}

impl Iterator for Positions<'_> {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        self.values.next().map(|(index, value)| Position {
            axis: self.axis.clone(),
            value: *value,
            index,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.values.size_hint()
    }
}

impl ExactSizeIterator for Positions<'_> {}
impl FusedIterator for Positions<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_the_array() {
        let gen = ArrayGenerator::new("stage_x", vec![0.5, 1.0, 1.5]).unwrap();
        let points: Vec<Position> = gen.iter().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].value, 1.5);
        assert_eq!(points[2].index, 2);
        assert_eq!(&*points[0].axis, "stage_x");
        assert_eq!(points[0].rank(), 1);
    }

    #[test]
    fn size_is_known_without_traversal() {
        let gen = ArrayGenerator::new("x", vec![1.0; 1000]).unwrap();
        let mut it = gen.iter();
        it.next();
        assert_eq!(it.len(), 999);
    }

    #[test]
    fn validation_rejects_missing_axis_and_empty_arrays() {
        assert_eq!(ArrayGenerator::new("", vec![1.0]).unwrap_err(), ScanError::MissingAxis);
        assert!(matches!(
            ArrayGenerator::new("x", vec![]),
            Err(ScanError::NoPositions { .. })
        ));
    }
}
