//! Memoized execution of scripts that can depend on other scripts. A
//! script's result is invalidated only when a file it actually read
//! changes.
//!
//! The calc language supports addition and `eval` statements referring to
//! other files.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rememo::{wrap, Dep, Error, Wrapper};

type Eval = Wrapper<(String,), i32, String>;

fn main() {
    let store: Rc<RefCell<HashMap<String, String>>> = Rc::new(RefCell::new(HashMap::new()));
    let changed: Dep<String> = Dep::new();

    // Reading a file records a dependency on its path.
    let read = {
        let store = store.clone();
        let changed = changed.clone();
        wrap(move |(path,): &(String,)| {
            changed.depend(path.clone());
            Ok::<String, Error<String>>(store.borrow().get(path).cloned().unwrap_or_default())
        })
    };

    // Evaluation recurses through a handle to itself so that nested `eval`
    // statements memoize per script source.
    let holder: Rc<RefCell<Option<Eval>>> = Rc::new(RefCell::new(None));
    let evaluate: Eval = {
        let read = read.clone();
        let holder = holder.clone();
        wrap(move |(script,): &(String,)| {
            let mut sum = 0;
            for part in script.split('+').map(str::trim) {
                sum += match part.strip_prefix("eval ") {
                    Some(path) => {
                        let source = read.call((path.to_string(),))?;
                        let evaluate = holder.borrow().clone().expect("evaluator installed");
                        evaluate.call((source,))?
                    }
                    None => part
                        .parse::<i32>()
                        .map_err(|error| Error::User(error.to_string()))?,
                };
            }
            Ok(sum)
        })
    };
    *holder.borrow_mut() = Some(evaluate.clone());

    let write = |path: &str, text: &str| {
        store.borrow_mut().insert(path.to_string(), text.to_string());
        changed.dirty(&path.to_string());
    };

    write("alpha.calc", "2 + eval beta.calc");
    write("beta.calc", "2 + 3");
    write("gamma.calc", "8 + 3");

    // The cache is empty, so everything is computed.
    assert_eq!(evaluate.call(("eval alpha.calc".into(),)), Ok(7));

    // This exact script was never evaluated, but "2 + 3" is not computed
    // again.
    assert_eq!(evaluate.call(("eval beta.calc".into(),)), Ok(5));

    // `gamma.calc` is not referenced by `alpha.calc`, so this stays a hit.
    write("gamma.calc", "42");
    assert_eq!(evaluate.call(("eval alpha.calc".into(),)), Ok(7));

    // `beta.calc` changed, so the chain above it recomputes.
    write("beta.calc", "4 + eval gamma.calc");
    assert_eq!(evaluate.call(("eval alpha.calc".into(),)), Ok(48));

    println!("all results recomputed exactly when their inputs changed");
}
