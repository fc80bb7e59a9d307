use crate::candle_model_errors::ModelError;
use candle_core::{Result, Tensor};

/// One slot of an ordered multimodal input. Index `i` always refers to
/// the same modality across inputs, priors, posteriors and likelihoods.
#[derive(Clone, Debug, Default)]
pub enum Modality<T> {
    Present(T),
    #[default]
    Absent,
}

impl<T> Modality<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Modality::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        !self.is_present()
    }

    pub fn as_ref(&self) -> Modality<&T> {
        match self {
            Modality::Present(x) => Modality::Present(x),
            Modality::Absent => Modality::Absent,
        }
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            Modality::Present(x) => Some(x),
            Modality::Absent => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Modality::Present(x) => Some(x),
            Modality::Absent => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> Modality<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Modality::Present(x) => Modality::Present(f(x)),
            Modality::Absent => Modality::Absent,
        }
    }

    /// Like `map`, but for fallible tensor operations
    pub fn try_map<U, E, F>(self, f: F) -> std::result::Result<Modality<U>, E>
    where
        F: FnOnce(T) -> std::result::Result<U, E>,
    {
        match self {
            Modality::Present(x) => Ok(Modality::Present(f(x)?)),
            Modality::Absent => Ok(Modality::Absent),
        }
    }
}

impl<T> From<Option<T>> for Modality<T> {
    fn from(x: Option<T>) -> Self {
        match x {
            Some(x) => Modality::Present(x),
            None => Modality::Absent,
        }
    }
}

/// Wrap fully observed data
pub fn all_present(x_vec: &[Tensor]) -> Vec<Modality<Tensor>> {
    x_vec.iter().cloned().map(Modality::Present).collect()
}

/// Keep modality `keep` and mark every other slot absent
pub fn only_modality<T: Clone>(x_vec: &[Modality<T>], keep: usize) -> Vec<Modality<T>> {
    x_vec
        .iter()
        .enumerate()
        .map(|(i, x)| if i == keep { x.clone() } else { Modality::Absent })
        .collect()
}

pub fn num_present<T>(x_vec: &[Modality<T>]) -> usize {
    x_vec.iter().filter(|x| x.is_present()).count()
}

/// Borrow every present entry, failing when nothing is observed
///
/// * `context` - what is asking, for the error message
pub fn present_or_fail<'a, T>(x_vec: &'a [Modality<T>], context: &str) -> Result<Vec<&'a T>> {
    let ret: Vec<&T> = x_vec.iter().filter_map(|x| x.present()).collect();
    if ret.is_empty() {
        return Err(ModelError::AllModalitiesAbsent {
            context: context.to_string(),
        }
        .into());
    }
    Ok(ret)
}

/// Fail fast when two aligned lists disagree in length
pub fn check_num_modalities(what: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(ModelError::ModalityCountMismatch {
            what: what.to_string(),
            expected,
            found,
        }
        .into());
    }
    Ok(())
}

/// Number of rows of the first present modality
pub fn batch_size(x_vec: &[Modality<Tensor>]) -> Result<usize> {
    present_or_fail(x_vec, "batch size")?[0].dim(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn only_modality_masks_others() -> Result<()> {
        let x = Tensor::ones((3, 2), DType::F32, &Device::Cpu)?;
        let y = Tensor::zeros((3, 4), DType::F32, &Device::Cpu)?;
        let xs = all_present(&[x, y]);

        let masked = only_modality(&xs, 1);
        assert!(masked[0].is_absent());
        assert_eq!(masked[1].present().map(|t| t.dims().to_vec()), Some(vec![3, 4]));
        assert_eq!(num_present(&masked), 1);
        Ok(())
    }

    #[test]
    fn nothing_present_is_an_error() {
        let xs: Vec<Modality<Tensor>> = vec![Modality::Absent, Modality::Absent];
        assert!(present_or_fail(&xs, "test").is_err());
        assert!(batch_size(&xs).is_err());
    }
}
