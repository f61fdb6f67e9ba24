use formexpr::prelude::*;
use proptest::prelude::*;

fn matrix_expr(m: usize, n: usize) -> Expr {
    Expr::coefficient(FunctionSpace::tensor(vec![m, n], m))
}

fn matrix_values(m: usize, n: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-2.0..2.0f64, n), m)
}

fn reference_det(a: &[Vec<f64>]) -> f64 {
    if a.len() == 1 {
        return a[0][0];
    }
    (0..a.len())
        .map(|c| {
            let minor: Vec<Vec<f64>> = a[1..]
                .iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .filter(|(j, _)| *j != c)
                        .map(|(_, v)| *v)
                        .collect()
                })
                .collect();
            let sign = if c % 2 == 0 { 1.0 } else { -1.0 };
            sign * a[0][c] * reference_det(&minor)
        })
        .sum()
}

fn gram(a: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = a[0].len();
    (0..n)
        .map(|i| (0..n).map(|j| a.iter().map(|row| row[i] * row[j]).sum()).collect())
        .collect()
}

fn close(x: f64, y: f64, tol: f64) -> bool {
    (x - y).abs() <= tol * (1.0 + x.abs().max(y.abs()))
}

/// Evaluates every component of a rank two expression.
fn evaluate_matrix(e: &Expr, bindings: &Bindings) -> Vec<Vec<f64>> {
    let (m, n) = (e.shape()[0], e.shape()[1]);
    (0..m)
        .map(|i| {
            (0..n)
                .map(|j| evaluate(&e.component(&[i, j]).unwrap(), bindings).unwrap())
                .collect()
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn determinant_2x2_matches_direct_formula(values in matrix_values(2, 2)) {
        let a = matrix_expr(2, 2);
        let det = determinant_expr(&a).unwrap();
        let bindings = Bindings::new().bind(&a, values.clone());
        let expected = values[0][0] * values[1][1] - values[0][1] * values[1][0];
        prop_assert_eq!(evaluate(&det, &bindings).unwrap(), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn determinant_matches_laplace_expansion(n in 1usize..=5, seed in matrix_values(5, 5)) {
        let values: Vec<Vec<f64>> = seed[..n].iter().map(|row| row[..n].to_vec()).collect();
        let a = matrix_expr(n, n);
        let det = determinant_expr(&a).unwrap();
        let bindings = Bindings::new().bind(&a, values.clone());
        let got = evaluate(&det, &bindings).unwrap();
        prop_assert!(close(got, reference_det(&values), 1e-9));
    }

    #[test]
    fn adjugate_times_matrix_is_scaled_identity(n in 2usize..=4, seed in matrix_values(4, 4)) {
        let values: Vec<Vec<f64>> = seed[..n].iter().map(|row| row[..n].to_vec()).collect();
        let a = matrix_expr(n, n);
        let adj = adj_expr(&a).unwrap();
        let bindings = Bindings::new().bind(&a, values.clone());
        let det = reference_det(&values);
        for product in [a.try_mul(&adj).unwrap(), adj.try_mul(&a).unwrap()] {
            let got = evaluate_matrix(&product, &bindings);
            for (i, row) in got.iter().enumerate() {
                for (j, v) in row.iter().enumerate() {
                    let expected = if i == j { det } else { 0.0 };
                    prop_assert!(close(*v, expected, 1e-9), "({}, {}): {} vs {}", i, j, v, expected);
                }
            }
        }
    }

    #[test]
    fn cofactor_is_transposed_adjugate(n in 2usize..=4, seed in matrix_values(4, 4)) {
        let values: Vec<Vec<f64>> = seed[..n].iter().map(|row| row[..n].to_vec()).collect();
        let a = matrix_expr(n, n);
        let bindings = Bindings::new().bind(&a, values);
        let adj = evaluate_matrix(&adj_expr(&a).unwrap(), &bindings);
        let cof = evaluate_matrix(&cofactor_expr(&a).unwrap(), &bindings);
        for i in 0..n {
            for j in 0..n {
                prop_assert!(close(cof[i][j], adj[j][i], 1e-12));
            }
        }
    }

    #[test]
    fn inverse_times_matrix_is_identity(n in 1usize..=3, seed in matrix_values(3, 3)) {
        let values: Vec<Vec<f64>> = seed[..n].iter().map(|row| row[..n].to_vec()).collect();
        prop_assume!(reference_det(&values).abs() > 0.1);
        let a = matrix_expr(n, n);
        let product = inverse_expr(&a).unwrap().try_mul(&a).unwrap();
        let bindings = Bindings::new().bind(&a, values);
        let got = evaluate_matrix(&product, &bindings);
        for (i, row) in got.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                prop_assert!(close(*v, expected, 1e-8));
            }
        }
    }

    #[test]
    fn pseudo_inverse_is_left_inverse(values in matrix_values(3, 2)) {
        prop_assume!(reference_det(&gram(&values)).abs() > 0.1);
        let a = matrix_expr(3, 2);
        let pinv = pseudo_inverse_expr(&a).unwrap();
        prop_assert_eq!(pinv.shape(), &[2, 3][..]);
        let product = pinv.try_mul(&a).unwrap();
        let bindings = Bindings::new().bind(&a, values);
        let got = evaluate_matrix(&product, &bindings);
        for (i, row) in got.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                prop_assert!(close(*v, expected, 1e-8));
            }
        }
    }

    #[test]
    fn pseudo_determinant_is_root_of_gram_determinant(m in 2usize..=4, seed in matrix_values(4, 3)) {
        let n = if m == 3 { 2 } else { m - 1 };
        let values: Vec<Vec<f64>> = seed[..m].iter().map(|row| row[..n].to_vec()).collect();
        let a = matrix_expr(m, n);
        let det = pseudo_determinant_expr(&a).unwrap();
        let bindings = Bindings::new().bind(&a, values.clone());
        let expected = reference_det(&gram(&values)).max(0.0).sqrt();
        prop_assert!(close(evaluate(&det, &bindings).unwrap(), expected, 1e-9));
    }

    #[test]
    fn deviatoric_part_is_trace_free(n in 2usize..=3, seed in matrix_values(3, 3)) {
        let values: Vec<Vec<f64>> = seed[..n].iter().map(|row| row[..n].to_vec()).collect();
        let a = matrix_expr(n, n);
        let dev = deviatoric_expr(&a).unwrap();
        let i = Index::new();
        let trace = dev.at(&[i, i]).unwrap();
        let bindings = Bindings::new().bind(&a, values);
        prop_assert!(evaluate(&trace, &bindings).unwrap().abs() < 1e-12);
    }
}

#[test]
fn cross_product_of_basis_vectors() {
    let u = Expr::coefficient(FunctionSpace::vector(3, 3));
    let v = Expr::coefficient(FunctionSpace::vector(3, 3));
    let c = cross_expr(&u, &v).unwrap();
    let bindings = Bindings::new()
        .bind(&u, vec![1.0, 0.0, 0.0])
        .bind(&v, vec![0.0, 1.0, 0.0]);
    let got: Vec<f64> = (0..3)
        .map(|k| evaluate(&c.component(&[k]).unwrap(), &bindings).unwrap())
        .collect();
    assert_eq!(got, vec![0.0, 0.0, 1.0]);
}
