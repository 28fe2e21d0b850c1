// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resources compiled into the binary, so the server has something to
//! show without any www root configured. Looked up by the exact
//! decoded request path; `-D` or `disable_embedded_res` turns the
//! whole table off.

pub struct Resource {
    pub name: &'static str,
    pub data: &'static [u8],
}

static RESOURCES: &[Resource] = &[
    Resource {
        name: "index.html",
        data: b"<!DOCTYPE html>\n\
<html><head><title>bramble</title>\n\
<link rel=\"stylesheet\" href=\"style.css\"></head>\n\
<body><h1>It works</h1>\n\
<p>This page is served from a resource embedded in the server binary.\n\
Configure a www root directory to serve your own content.</p>\n\
<hr><address>bramble</address></body></html>\n",
    },
    Resource {
        name: "style.css",
        data: b"body { font-family: sans-serif; margin: 2em; }\n\
h1 { color: #811331; }\n\
hr { border: 0; border-top: 1px solid #ccc; }\n",
    },
];

pub fn find(name: &str) -> Option<&'static Resource> {
    RESOURCES.iter().find(|r| r.name == name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_is_exact() {
        assert!(find("index.html").is_some());
        assert!(find("style.css").is_some());
        assert!(find("INDEX.HTML").is_none());
        assert!(find("nope.html").is_none());
    }
}
