use std::cmp::Ordering;

/// Multiple-testing correction method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Correction {
    /// Benjamini-Hochberg false discovery rate
    BenjaminiHochberg,
    /// Bonferroni family-wise error rate
    Bonferroni,
}

impl std::str::FromStr for Correction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bh" | "benjamini-hochberg" => Ok(Correction::BenjaminiHochberg),
            "bonferroni" => Ok(Correction::Bonferroni),
            other => Err(format!("correction not recognized: {other}")),
        }
    }
}

/// Adjust (index, p) pairs with the chosen method, preserving indices so
/// the caller can scatter back into a partially-tested gene set.
pub fn adjust(method: Correction, pvalues: &[(usize, f64)]) -> Vec<(usize, f64)> {
    match method {
        Correction::BenjaminiHochberg => adjusted_pvalue_bh(pvalues),
        Correction::Bonferroni => adjusted_pvalue_bonferroni(pvalues),
    }
}

/// Benjamini-Hochberg step-up adjustment over (index, p) pairs.
pub fn adjusted_pvalue_bh(pvalues: &[(usize, f64)]) -> Vec<(usize, f64)> {
    // sort descending, NaNs to the front so they absorb no rank
    let mut arr = pvalues.to_vec();
    arr.sort_by(|&(_, a), &(_, b)| match a.partial_cmp(&b) {
        Some(o) => o.reverse(),
        None => {
            if a.is_nan() && b.is_nan() {
                Ordering::Equal
            } else if a.is_nan() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    });

    // q = min(1, running minimum of p * n / rank) walking down the sort
    let len = arr.len() as f64;
    let mut min = f64::MAX;
    for (idx, (_, val)) in arr.iter_mut().enumerate() {
        *val *= len / (len - idx as f64);
        if *val < min {
            min = *val;
        }
        *val = min.min(1.0);
    }

    arr
}

/// Bonferroni adjustment over (index, p) pairs.
pub fn adjusted_pvalue_bonferroni(pvalues: &[(usize, f64)]) -> Vec<(usize, f64)> {
    let n = pvalues.len() as f64;
    pvalues.iter().map(|&(i, p)| (i, (p * n).min(1.0))).collect()
}
