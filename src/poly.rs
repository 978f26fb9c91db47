/// Winding number algorithm
/// https://en.wikipedia.org/wiki/Point_in_polygon#Winding_number_algorithm
/// https://web.archive.org/web/20130126163405/http://geomalgorithms.com/a03-_inclusion.html
///
/// The ring is a closed list of (x, y) vertices (first == last). A
/// nonzero result means the point is inside.
pub fn wn(ring: &[(f64, f64)], x: f64, y: f64) -> i32 {
    #[inline]
    fn is_left(x0: f64, y0: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
        ((x1 - x0) * (y2 - y0)) - ((x2 - x0) * (y1 - y0))
    }
    let mut wn = 0;
    for w in ring.windows(2) {
        let (ex1, ey1) = w[0];
        let (ex2, ey2) = w[1];
        if ey1 <= y {
            if ey2 > y {
                if is_left(ex1, ey1, ex2, ey2, x, y) > 0.0 {
                    wn += 1;
                }
            }
        } else {
            if ey2 <= y {
                if is_left(ex1, ey1, ex2, ey2, x, y) < 0.0 {
                    wn -= 1;
                }
            }
        }
    }
    wn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wn_unit_square() {
        let p = vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)];
        assert_eq!(wn(&p, 0.5, 0.5), -1);
        assert_eq!(wn(&p, 1.5, 1.5), 0);
        assert_eq!(wn(&p, -1.5, -1.5), 0);
        assert_eq!(wn(&p, 0.9, 0.1), -1);
    }

    #[test]
    fn wn_concave_ring() {
        // L-shaped ring; the notch is outside.
        let p = vec![
            (0.0, 0.0),
            (4.0, 0.0),
            (4.0, 4.0),
            (2.0, 4.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ];
        assert_eq!(wn(&p, 1.0, 1.0), 1);
        assert_eq!(wn(&p, 3.0, 3.0), 1);
        assert_eq!(wn(&p, 1.0, 3.0), 0);
    }
}
