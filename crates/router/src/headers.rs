use gateway_proto::ext_proc::{HeaderMutation, HeaderValue, HeaderValueOption};

#[derive(Default)]
pub struct HeaderMutationBuilder {
    set: Vec<(String, String)>,
    remove: Vec<String>,
}

impl HeaderMutationBuilder {
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set.push((key.into(), value.into()));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.remove.push(key.into());
        self
    }

    pub fn build(self) -> HeaderMutation {
        HeaderMutation {
            set_headers: self
                .set
                .into_iter()
                .map(|(key, value)| HeaderValueOption {
                    header: Some(HeaderValue { key, value }),
                    append: None,
                })
                .collect(),
            remove_headers: self.remove,
        }
    }
}
