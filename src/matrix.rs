//! Parameter matrices.
//!
//! A [`ParameterSet`] maps parameter names to candidate values. Its matrix is
//! every combination of one value per parameter, produced lazily in nested-loop
//! order: the last declared parameter varies fastest.

/// Ordered mapping from parameter name to candidate values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet<V> {
    params: Vec<(String, Vec<V>)>,
}

impl<V> Default for ParameterSet<V> {
    fn default() -> Self {
        Self { params: Vec::new() }
    }
}

impl<V> ParameterSet<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ParameterSet::insert`].
    pub fn with(mut self, name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.insert(name, values);
        self
    }

    /// Add a parameter. Re-inserting an existing name replaces its values but
    /// keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = V>) {
        let name = name.into();
        let values: Vec<V> = values.into_iter().collect();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = values,
            None => self.params.push((name, values)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[V]> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of assignments the matrix yields.
    pub fn cardinality(&self) -> usize {
        self.params.iter().map(|(_, v)| v.len()).product()
    }

    /// Iterate over every combination. Calling this again restarts iteration.
    pub fn matrix(&self) -> Matrix<'_, V> {
        let exhausted = self.params.iter().any(|(_, v)| v.is_empty());
        Matrix {
            set: self,
            cursor: (!exhausted).then(|| vec![0; self.params.len()]),
        }
    }
}

/// One value chosen for every parameter of a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<V> {
    values: Vec<(String, V)>,
}

impl<V> Default for Assignment<V> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<V> Assignment<V> {
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// This assignment with `inner`'s values added; `inner` wins on a name
    /// both define.
    pub fn shadowed_by(&self, inner: &Assignment<V>) -> Assignment<V>
    where
        V: Clone,
    {
        let mut values: Vec<(String, V)> = self
            .values
            .iter()
            .filter(|(n, _)| inner.get(n).is_none())
            .cloned()
            .collect();
        values.extend(inner.values.iter().cloned());
        Assignment { values }
    }

    /// Render as `name=value, name=value` using `fmt` for each value.
    pub fn describe(&self, fmt: impl Fn(&V) -> String) -> String {
        self.values
            .iter()
            .map(|(n, v)| format!("{n}={}", fmt(v)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Lazy iterator over the assignments of a [`ParameterSet`].
#[derive(Debug, Clone)]
pub struct Matrix<'a, V> {
    set: &'a ParameterSet<V>,
    /// Index into each candidate list; `None` once exhausted.
    cursor: Option<Vec<usize>>,
}

impl<V: Clone> Iterator for Matrix<'_, V> {
    type Item = Assignment<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        let values = self
            .set
            .params
            .iter()
            .zip(cursor.iter())
            .map(|((name, values), &i)| (name.clone(), values[i].clone()))
            .collect();

        // Odometer step, rightmost digit first.
        let mut carried = true;
        for (digit, (_, values)) in cursor.iter_mut().zip(&self.set.params).rev() {
            *digit += 1;
            if *digit < values.len() {
                carried = false;
                break;
            }
            *digit = 0;
        }
        if carried {
            self.cursor = None;
        }

        Some(Assignment { values })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match &self.cursor {
            None => 0,
            Some(cursor) => {
                let mut consumed = 0;
                for (digit, (_, values)) in cursor.iter().zip(&self.set.params) {
                    consumed = consumed * values.len() + digit;
                }
                self.set.cardinality() - consumed
            }
        };
        (remaining, Some(remaining))
    }
}

impl<V: Clone> ExactSizeIterator for Matrix<'_, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn last_parameter_varies_fastest() {
        let set = ParameterSet::new().with("a", [1, 2, 3]).with("b", [4, 5]);
        let combos: Vec<(i32, i32)> = set
            .matrix()
            .map(|a| (*a.get("a").unwrap(), *a.get("b").unwrap()))
            .collect();
        assert_eq!(
            combos,
            vec![(1, 4), (1, 5), (2, 4), (2, 5), (3, 4), (3, 5)]
        );
    }

    #[test]
    fn zero_parameters_yield_one_empty_assignment() {
        let set: ParameterSet<i32> = ParameterSet::new();
        let all: Vec<_> = set.matrix().collect();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_empty());
    }

    #[test]
    fn inner_assignment_shadows_outer() {
        let outer = ParameterSet::new().with("a", [1]).with("b", [2]);
        let inner = ParameterSet::new().with("b", [3]).with("c", [4]);
        let outer = outer.matrix().next().unwrap();
        let inner = inner.matrix().next().unwrap();
        let scope = outer.shadowed_by(&inner);
        assert_eq!(scope.describe(|v| v.to_string()), "a=1, b=3, c=4");
    }

    #[test]
    fn single_candidate_is_still_iterated() {
        let set = ParameterSet::new().with("only", ["x"]);
        let all: Vec<_> = set.matrix().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("only"), Some(&"x"));
    }

    #[test]
    fn empty_candidate_list_yields_nothing() {
        let set = ParameterSet::new().with("a", [1, 2]).with("b", Vec::<i32>::new());
        assert_eq!(set.matrix().count(), 0);
        assert_eq!(set.cardinality(), 0);
    }

    #[test]
    fn matrix_is_restartable() {
        let set = ParameterSet::new().with("a", [1, 2]).with("b", [3, 4]);
        let first: Vec<_> = set.matrix().collect();
        let second: Vec<_> = set.matrix().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn reinserting_keeps_position() {
        let mut set = ParameterSet::new().with("a", [1]).with("b", [2]);
        set.insert("a", [7, 8]);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.get("a"), Some(&[7, 8][..]));
    }

    #[test]
    fn describe_formats_in_declaration_order() {
        let set = ParameterSet::new().with("x", [1]).with("y", [2]);
        let assignment = set.matrix().next().unwrap();
        assert_eq!(assignment.describe(|v| v.to_string()), "x=1, y=2");
    }

    #[test]
    fn size_hint_tracks_progress() {
        let set = ParameterSet::new().with("a", [1, 2]).with("b", [3, 4, 5]);
        let mut matrix = set.matrix();
        assert_eq!(matrix.len(), 6);
        matrix.next();
        matrix.next();
        assert_eq!(matrix.len(), 4);
        matrix.by_ref().for_each(drop);
        assert_eq!(matrix.len(), 0);
    }

    proptest! {
        #[test]
        fn yields_product_of_distinct_complete_combinations(
            lengths in proptest::collection::vec(1usize..4, 0..4)
        ) {
            let mut set = ParameterSet::new();
            for (i, len) in lengths.iter().enumerate() {
                set.insert(format!("p{i}"), 0..*len);
            }
            let all: Vec<_> = set.matrix().collect();
            prop_assert_eq!(all.len(), lengths.iter().product::<usize>());

            let as_tuples: Vec<Vec<usize>> = all
                .iter()
                .map(|a| {
                    prop_assert_eq!(a.len(), lengths.len());
                    Ok(a.iter().map(|(_, v)| *v).collect())
                })
                .collect::<Result<_, TestCaseError>>()?;
            let mut sorted = as_tuples.clone();
            sorted.sort();
            sorted.dedup();
            // Nested-loop order is already lexicographic and duplicate free.
            prop_assert_eq!(sorted, as_tuples);
        }
    }
}
