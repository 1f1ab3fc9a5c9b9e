//! Internal testing utilities for the onnx-batchsize crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Runs table-driven tests.
///
/// Define a `Debug` struct, conventionally named `Case`, holding the inputs
/// and expected outputs of one test. Put the cases in any collection and call
/// [`test_each`](TestCases::test_each) with the test body:
///
/// ```
/// use onnx_batchsize_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     dims: Vec<i64>,
///     expected_len: usize,
/// }
///
/// let cases = [
///     Case { dims: vec![], expected_len: 1 },
///     Case { dims: vec![2, 3], expected_len: 6 },
/// ];
///
/// cases.test_each(|case| {
///     let len: i64 = case.dims.iter().product();
///     assert_eq!(len as usize, case.expected_len);
/// });
/// ```
///
/// Every case is run even if earlier ones fail. Panics are caught, and once
/// all cases have run the test fails with the index and debug representation
/// of each failing case.
///
/// Test cases, and values captured by the test closure, must be
/// [unwind safe](std::panic::UnwindSafe). Values with interior mutability
/// should be created inside the closure, or wrapped in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Call `test` with each case by value.
    ///
    /// The debug representation of each case is captured before it is moved
    /// into the test function.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// A case which panicked.
struct Failure {
    index: usize,
    case: String,
}

fn check_failures(total: usize, failures: &[Failure]) {
    if failures.is_empty() {
        return;
    }
    let details: Vec<String> = failures
        .iter()
        .map(|f| format!("  case {}: {}", f.index, f.case))
        .collect();
    panic!(
        "{} of {} test cases failed:\n{}",
        failures.len(),
        total,
        details.join("\n")
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let mut failures = Vec::new();
        let mut total = 0;
        for (index, case) in self.into_iter().enumerate() {
            total += 1;
            if std::panic::catch_unwind(|| test(&case)).is_err() {
                failures.push(Failure {
                    index,
                    case: format!("{:?}", case),
                });
            }
        }
        check_failures(total, &failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let mut failures = Vec::new();
        let mut total = 0;
        for (index, case) in self.into_iter().enumerate() {
            total += 1;
            let case_str = format!("{:?}", case);
            let test = &test;
            if std::panic::catch_unwind(move || test(case)).is_err() {
                failures.push(Failure {
                    index,
                    case: case_str,
                });
            }
        }
        check_failures(total, &failures);
    }
}
