//! Route matching result.

/// A matched route with extracted parameters.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    /// The value registered for the route.
    pub value: &'a T,
    /// Extracted path parameters, in pattern order.
    pub params: Vec<(&'a str, &'a str)>,
}

impl<'a, T> RouteMatch<'a, T> {
    /// Get a parameter value by name.
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}
